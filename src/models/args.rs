use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
pub struct Args {
    /// 打印详情(debug日志)
    #[arg(short, long, global = true, default_value_t = false)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// 按配置文件执行压测
    Run {
        /// yaml或json配置文件
        config: PathBuf,

        /// 报告格式
        #[arg(short, long, value_enum, default_value_t = OutputFormat::Table)]
        output: OutputFormat,

        /// 额外把json报告写到这个文件
        #[arg(long, env = "RAMP_BOMB_SUMMARY_EXPORT")]
        summary_export: Option<PathBuf>,

        /// 不显示进度条
        #[arg(short, long, default_value_t = false)]
        quiet: bool,
    },
    /// 只校验配置文件，不发请求
    Validate {
        config: PathBuf,
    },
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Table,
    Json,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_run() {
        let args = Args::parse_from([
            "ramp-bomb",
            "run",
            "loadtest.yaml",
            "--output",
            "json",
            "--summary-export",
            "out.json",
            "-q",
            "-v",
        ]);
        assert!(args.verbose);
        match args.command {
            Command::Run {
                config,
                output,
                summary_export,
                quiet,
            } => {
                assert_eq!(config, PathBuf::from("loadtest.yaml"));
                assert_eq!(output, OutputFormat::Json);
                assert_eq!(summary_export, Some(PathBuf::from("out.json")));
                assert!(quiet);
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_parse_validate() {
        let args = Args::parse_from(["ramp-bomb", "validate", "loadtest.json"]);
        assert!(!args.verbose);
        assert!(matches!(args.command, Command::Validate { .. }));
    }
}
