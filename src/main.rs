use std::fs::File;
use std::io::{stdout, BufWriter, Write};
use std::path::Path;
use std::process::ExitCode;

use anyhow::Context;
use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use ramp_bomb_engine::core::run_controller::{EXIT_CONFIG_ERROR, EXIT_FATAL, EXIT_OK};
use ramp_bomb_engine::core::show_result_with_table::{write_json, write_table};
use ramp_bomb_engine::models::args::{Args, Command, OutputFormat};
use ramp_bomb_engine::{exit_code, run, RunConfig, RunOptions, RunPlan, RunReport};

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn load(path: &Path) -> ramp_bomb_engine::Result<RunPlan> {
    RunConfig::from_file(path)?.into_plan()
}

fn emit(report: &RunReport, output: OutputFormat, summary_export: Option<&Path>) -> anyhow::Result<()> {
    let mut out = BufWriter::new(stdout().lock());
    match output {
        OutputFormat::Table => write_table(report, &mut out)?,
        OutputFormat::Json => write_json(report, &mut out)?,
    }
    out.flush()?;
    if let Some(path) = summary_export {
        let file = File::create(path).with_context(|| format!("无法创建{}", path.display()))?;
        let mut writer = BufWriter::new(file);
        write_json(report, &mut writer)?;
        writer.flush()?;
        info!(path = %path.display(), "报告已导出");
    }
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    init_tracing(args.verbose);

    let code = match args.command {
        Command::Validate { config } => match load(&config) {
            Ok(plan) => {
                println!(
                    "配置有效: {}个阶段, {}个请求, {}条阈值, 最大并发{}",
                    plan.ramp.stages().len(),
                    plan.requests.len(),
                    plan.rules.len(),
                    plan.ramp.peak()
                );
                EXIT_OK
            }
            Err(e) => {
                error!("{}", e);
                EXIT_CONFIG_ERROR
            }
        },
        Command::Run {
            config,
            output,
            summary_export,
            quiet,
        } => {
            let result = match load(&config) {
                Ok(plan) => run(plan, &RunOptions { quiet }).await,
                Err(e) => Err(e),
            };
            match &result {
                Ok(report) => match emit(report, output, summary_export.as_deref()) {
                    Ok(()) => exit_code(&result),
                    Err(e) => {
                        error!("输出报告失败: {:#}", e);
                        EXIT_FATAL
                    }
                },
                Err(e) => {
                    error!("{}", e);
                    exit_code(&result)
                }
            }
        }
    };
    ExitCode::from(code as u8)
}
