use std::fmt;
use std::str::FromStr;

use serde::de::{self, MapAccess, Visitor};
use serde::{Deserialize, Deserializer, Serialize};

use crate::error::EngineError;

// 指标类型，决定了可以用哪些聚合方式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricKind {
    Counter,
    Rate,
    Trend,
    Gauge,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricName {
    HttpReqs,
    HttpReqFailed,
    HttpReqDuration,
    Iterations,
    IterationDuration,
    Checks,
    DataReceived,
    Vus,
    VusMax,
}

impl MetricName {
    pub fn as_str(&self) -> &'static str {
        match self {
            MetricName::HttpReqs => "http_reqs",
            MetricName::HttpReqFailed => "http_req_failed",
            MetricName::HttpReqDuration => "http_req_duration",
            MetricName::Iterations => "iterations",
            MetricName::IterationDuration => "iteration_duration",
            MetricName::Checks => "checks",
            MetricName::DataReceived => "data_received",
            MetricName::Vus => "vus",
            MetricName::VusMax => "vus_max",
        }
    }

    pub fn kind(&self) -> MetricKind {
        match self {
            MetricName::HttpReqs | MetricName::Iterations | MetricName::DataReceived => {
                MetricKind::Counter
            }
            MetricName::HttpReqFailed | MetricName::Checks => MetricKind::Rate,
            MetricName::HttpReqDuration | MetricName::IterationDuration => MetricKind::Trend,
            MetricName::Vus | MetricName::VusMax => MetricKind::Gauge,
        }
    }

    // 只有http请求相关的指标可以按请求名过滤
    fn per_request(&self) -> bool {
        matches!(
            self,
            MetricName::HttpReqs | MetricName::HttpReqFailed | MetricName::HttpReqDuration
        )
    }
}

impl FromStr for MetricName {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let name = match s {
            "http_reqs" => MetricName::HttpReqs,
            "http_req_failed" => MetricName::HttpReqFailed,
            "http_req_duration" => MetricName::HttpReqDuration,
            "iterations" => MetricName::Iterations,
            "iteration_duration" => MetricName::IterationDuration,
            "checks" => MetricName::Checks,
            "data_received" => MetricName::DataReceived,
            "vus" => MetricName::Vus,
            "vus_max" => MetricName::VusMax,
            other => return Err(EngineError::config(format!("未知的指标: {}", other))),
        };
        Ok(name)
    }
}

/// 阈值的key，例如 `http_req_duration` 或 `http_req_duration{name:ip}`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricKey {
    pub metric: MetricName,
    pub request: Option<String>,
}

impl FromStr for MetricKey {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let Some(open) = s.find('{') else {
            return Ok(MetricKey {
                metric: s.parse()?,
                request: None,
            });
        };
        let selector = s[open + 1..]
            .strip_suffix('}')
            .ok_or_else(|| EngineError::config(format!("指标选择器缺少'}}': {}", s)))?;
        let metric: MetricName = s[..open].trim().parse()?;
        if !metric.per_request() {
            return Err(EngineError::config(format!(
                "指标{}不支持按请求名过滤",
                metric.as_str()
            )));
        }
        let name = selector
            .split_once(':')
            .filter(|(tag, _)| tag.trim() == "name")
            .map(|(_, value)| value.trim())
            .filter(|value| !value.is_empty())
            .ok_or_else(|| EngineError::config(format!("只支持{{name:<请求名>}}选择器: {}", s)))?;
        Ok(MetricKey {
            metric,
            request: Some(name.to_string()),
        })
    }
}

impl fmt::Display for MetricKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.request {
            Some(name) => write!(f, "{}{{name:{}}}", self.metric.as_str(), name),
            None => f.write_str(self.metric.as_str()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Aggregation {
    Rate,
    Count,
    Avg,
    Min,
    Max,
    Med,
    Value,
    Percentile(f64),
}

impl Aggregation {
    fn allowed_for(&self, kind: MetricKind) -> bool {
        match kind {
            MetricKind::Counter => matches!(self, Aggregation::Count | Aggregation::Rate),
            MetricKind::Rate => matches!(self, Aggregation::Rate),
            MetricKind::Trend => matches!(
                self,
                Aggregation::Avg
                    | Aggregation::Min
                    | Aggregation::Max
                    | Aggregation::Med
                    | Aggregation::Percentile(_)
            ),
            MetricKind::Gauge => matches!(self, Aggregation::Value),
        }
    }
}

impl FromStr for Aggregation {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let agg = match s {
            "rate" => Aggregation::Rate,
            "count" => Aggregation::Count,
            "avg" => Aggregation::Avg,
            "min" => Aggregation::Min,
            "max" => Aggregation::Max,
            "med" => Aggregation::Med,
            "value" => Aggregation::Value,
            other => {
                let inner = other
                    .strip_prefix("p(")
                    .and_then(|rest| rest.strip_suffix(')'))
                    .ok_or_else(|| EngineError::config(format!("未知的聚合方式: {}", other)))?;
                let p: f64 = inner
                    .trim()
                    .parse()
                    .map_err(|_| EngineError::config(format!("无法解析百分位: {}", other)))?;
                if !(p > 0.0 && p <= 100.0) {
                    return Err(EngineError::config(format!("百分位必须在(0, 100]之间: {}", other)));
                }
                Aggregation::Percentile(p)
            }
        };
        Ok(agg)
    }
}

impl fmt::Display for Aggregation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Aggregation::Rate => f.write_str("rate"),
            Aggregation::Count => f.write_str("count"),
            Aggregation::Avg => f.write_str("avg"),
            Aggregation::Min => f.write_str("min"),
            Aggregation::Max => f.write_str("max"),
            Aggregation::Med => f.write_str("med"),
            Aggregation::Value => f.write_str("value"),
            Aggregation::Percentile(p) => write!(f, "p({})", p),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparison {
    Lt,
    Le,
    Gt,
    Ge,
    Eq,
    Ne,
}

impl Comparison {
    pub fn holds(&self, observed: f64, reference: f64) -> bool {
        match self {
            Comparison::Lt => observed < reference,
            Comparison::Le => observed <= reference,
            Comparison::Gt => observed > reference,
            Comparison::Ge => observed >= reference,
            Comparison::Eq => observed == reference,
            Comparison::Ne => observed != reference,
        }
    }
}

// 按长度从长到短排，保证 "<=" 不会被当成 "<"
const OPERATORS: [(&str, Comparison); 7] = [
    ("===", Comparison::Eq),
    ("<=", Comparison::Le),
    (">=", Comparison::Ge),
    ("==", Comparison::Eq),
    ("!=", Comparison::Ne),
    ("<", Comparison::Lt),
    (">", Comparison::Gt),
];

/// 一条已经解析校验过的阈值规则
///
/// 趋势类指标的参考值统一换算成毫秒
#[derive(Debug, Clone)]
pub struct ThresholdRule {
    pub key: MetricKey,
    pub source: String,
    pub aggregation: Aggregation,
    pub comparison: Comparison,
    pub reference: f64,
}

impl ThresholdRule {
    pub fn parse(key: &str, expression: &str) -> Result<Self, EngineError> {
        let key: MetricKey = key.parse()?;
        let compact: String = expression.chars().filter(|c| !c.is_whitespace()).collect();
        let (position, op_str, comparison) = compact
            .char_indices()
            .find_map(|(i, _)| {
                OPERATORS
                    .iter()
                    .find(|(op, _)| compact[i..].starts_with(op))
                    .map(|(op, cmp)| (i, *op, *cmp))
            })
            .ok_or_else(|| EngineError::config(format!("阈值表达式缺少比较符: {}", expression)))?;

        let aggregation: Aggregation = compact[..position].parse()?;
        let kind = key.metric.kind();
        if !aggregation.allowed_for(kind) {
            return Err(EngineError::config(format!(
                "指标{}不支持聚合方式{}",
                key.metric.as_str(),
                aggregation
            )));
        }
        let raw_value = &compact[position + op_str.len()..];
        let reference = parse_reference(raw_value, kind)
            .map_err(|msg| EngineError::config(format!("{}: {}", msg, expression)))?;
        if kind == MetricKind::Rate && reference > 1.0 {
            return Err(EngineError::config(format!("比率阈值必须在[0, 1]之间: {}", expression)));
        }

        Ok(ThresholdRule {
            key,
            source: expression.trim().to_string(),
            aggregation,
            comparison,
            reference,
        })
    }
}

// 趋势类指标可以带时间单位，没有单位时按毫秒算
fn parse_reference(raw: &str, kind: MetricKind) -> Result<f64, &'static str> {
    if raw.is_empty() {
        return Err("阈值表达式缺少参考值");
    }
    let split = raw
        .find(|c: char| !(c.is_ascii_digit() || c == '.' || c == '-' || c == '+' || c == 'e'))
        .unwrap_or(raw.len());
    let (number, unit) = raw.split_at(split);
    let value: f64 = number.parse().map_err(|_| "无法解析参考值")?;
    let scale = match (unit, kind) {
        ("", _) => 1.0,
        ("us" | "µs", MetricKind::Trend) => 0.001,
        ("ms", MetricKind::Trend) => 1.0,
        ("s", MetricKind::Trend) => 1000.0,
        ("m", MetricKind::Trend) => 60_000.0,
        (_, MetricKind::Trend) => return Err("未知的时间单位"),
        _ => return Err("只有耗时类指标可以带单位"),
    };
    let value = value * scale;
    if !value.is_finite() || value < 0.0 {
        return Err("参考值必须是非负的有限数字");
    }
    Ok(value)
}

/// 配置里的阈值: 一个指标key可以对应一条或多条表达式
///
/// 同一个key出现两次直接报错，不会静默覆盖
#[derive(Debug, Clone, Default)]
pub struct ThresholdSet {
    pub entries: Vec<(String, Vec<String>)>,
}

impl ThresholdSet {
    pub fn rules(&self) -> Result<Vec<ThresholdRule>, EngineError> {
        let mut rules = Vec::new();
        for (key, expressions) in &self.entries {
            if expressions.is_empty() {
                return Err(EngineError::config(format!("指标{}的阈值列表为空", key)));
            }
            for expression in expressions {
                rules.push(ThresholdRule::parse(key, expression)?);
            }
        }
        Ok(rules)
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ThresholdExpr {
    One(String),
    Many(Vec<String>),
}

impl<'de> Deserialize<'de> for ThresholdSet {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct SetVisitor;

        impl<'de> Visitor<'de> for SetVisitor {
            type Value = ThresholdSet;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("指标名到阈值表达式(或表达式列表)的映射")
            }

            fn visit_map<A>(self, mut map: A) -> Result<Self::Value, A::Error>
            where
                A: MapAccess<'de>,
            {
                let mut entries: Vec<(String, Vec<String>)> = Vec::new();
                while let Some((key, expr)) = map.next_entry::<String, ThresholdExpr>()? {
                    if entries.iter().any(|(k, _)| *k == key) {
                        return Err(de::Error::custom(format!(
                            "重复的阈值key: {}，多条规则请写成列表",
                            key
                        )));
                    }
                    let expressions = match expr {
                        ThresholdExpr::One(s) => vec![s],
                        ThresholdExpr::Many(v) => v,
                    };
                    entries.push((key, expressions));
                }
                Ok(ThresholdSet { entries })
            }
        }

        deserializer.deserialize_map(SetVisitor)
    }
}

impl Serialize for ThresholdSet {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        use serde::ser::SerializeMap;
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (key, expressions) in &self.entries {
            map.serialize_entry(key, expressions)?;
        }
        map.end()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_rate_rule() {
        let rule = ThresholdRule::parse("http_req_failed", "rate<0.01").unwrap();
        assert_eq!(rule.key.metric, MetricName::HttpReqFailed);
        assert_eq!(rule.aggregation, Aggregation::Rate);
        assert_eq!(rule.comparison, Comparison::Lt);
        assert_eq!(rule.reference, 0.01);
    }

    #[test]
    fn test_parse_percentile_with_units() {
        let rule = ThresholdRule::parse("http_req_duration", "p(95) < 500").unwrap();
        assert_eq!(rule.aggregation, Aggregation::Percentile(95.0));
        assert_eq!(rule.reference, 500.0);

        let rule = ThresholdRule::parse("http_req_duration", "p(99.9)<=1.5s").unwrap();
        assert_eq!(rule.aggregation, Aggregation::Percentile(99.9));
        assert_eq!(rule.comparison, Comparison::Le);
        assert_eq!(rule.reference, 1500.0);

        let rule = ThresholdRule::parse("iteration_duration", "avg<250us").unwrap();
        assert!((rule.reference - 0.25).abs() < 1e-9);
    }

    #[test]
    fn test_parse_request_selector() {
        let rule = ThresholdRule::parse("http_req_duration{name:ip}", "med<100ms").unwrap();
        assert_eq!(rule.key.request.as_deref(), Some("ip"));
        assert_eq!(rule.key.to_string(), "http_req_duration{name:ip}");
        assert!(ThresholdRule::parse("iterations{name:ip}", "count>1").is_err());
        assert!(ThresholdRule::parse("http_reqs{status:200}", "count>1").is_err());
    }

    #[test]
    fn test_invalid_rules_are_config_errors() {
        let cases = [
            ("http_req_failed", "rate<1.5"),
            ("http_req_failed", "rate<-0.1"),
            ("http_req_failed", "p(95)<0.1"),
            ("http_req_duration", "p(0)<500"),
            ("http_req_duration", "p(101)<500"),
            ("http_req_duration", "p(95)<abc"),
            ("http_req_duration", "p(95)<500h"),
            ("http_req_duration", "p(95)"),
            ("http_req_duration", "rate<1"),
            ("http_reqs", "count>10ms"),
            ("unknown_metric", "rate<1"),
        ];
        for (key, expr) in cases {
            let err = ThresholdRule::parse(key, expr).unwrap_err();
            assert!(err.is_config(), "{} {} 应该是配置错误", key, expr);
        }
    }

    #[test]
    fn test_comparison_is_strict() {
        assert!(!Comparison::Lt.holds(0.01, 0.01));
        assert!(Comparison::Le.holds(0.01, 0.01));
        assert!(Comparison::Ne.holds(1.0, 2.0));
    }

    #[test]
    fn test_threshold_set_keeps_every_rule() {
        let yaml = r#"
http_req_failed: "rate<0.01"
http_req_duration: ["p(95)<500", "p(99)<1500"]
"#;
        let set: ThresholdSet = serde_yaml::from_str(yaml).unwrap();
        let rules = set.rules().unwrap();
        assert_eq!(rules.len(), 3);
        assert_eq!(rules[1].aggregation, Aggregation::Percentile(95.0));
        assert_eq!(rules[2].aggregation, Aggregation::Percentile(99.0));
    }

    #[test]
    fn test_threshold_set_rejects_duplicate_keys() {
        let json = r#"{"http_req_duration": "p(95)<500", "http_req_duration": "p(99)<1500"}"#;
        let err = serde_json::from_str::<ThresholdSet>(json).unwrap_err();
        assert!(err.to_string().contains("重复的阈值key"));
    }
}
