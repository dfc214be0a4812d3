#![forbid(unsafe_code)]

use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use iv_vetting::{PolicyName, Report, VettingConfig, run_vetting_files};
use tracing_subscriber::{EnvFilter, fmt};

struct CliArgs {
    table: PathBuf,
    criteria: PathBuf,
    policy: PolicyName,
    serial: bool,
    json_out: Option<PathBuf>,
    outcomes_csv: Option<PathBuf>,
    verdicts_csv: Option<PathBuf>,
    require_accept: bool,
}

fn main() -> ExitCode {
    init_logging();
    match run() {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::from(1),
        Err(error) => {
            eprintln!("iv-vet error: {error}");
            ExitCode::from(2)
        }
    }
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn run() -> Result<bool, Box<dyn std::error::Error>> {
    let args = parse_args()?;

    let mut config = VettingConfig::default().with_policy(args.policy);
    if args.serial {
        config = config.serial();
    }

    let report = run_vetting_files(&args.table, &args.criteria, &config)?;
    println!("{report}");

    if let Some(path) = &args.json_out {
        prepare_parent(path)?;
        iv_io::write_report_json(&report, path)?;
        println!("wrote report_json={}", path.display());
    }
    if let Some(path) = &args.outcomes_csv {
        prepare_parent(path)?;
        iv_io::write_text(path, &iv_io::write_outcomes_csv_string(&report)?)?;
        println!("wrote outcomes_csv={}", path.display());
    }
    if let Some(path) = &args.verdicts_csv {
        prepare_parent(path)?;
        iv_io::write_text(path, &iv_io::write_verdicts_csv_string(&report)?)?;
        println!("wrote verdicts_csv={}", path.display());
    }

    Ok(!args.require_accept || all_accepted(&report))
}

fn all_accepted(report: &Report) -> bool {
    report.summary.all_accepted()
}

fn prepare_parent(path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    Ok(())
}

fn parse_args() -> Result<CliArgs, Box<dyn std::error::Error>> {
    let mut table = None;
    let mut criteria = None;
    let mut policy = PolicyName::default();
    let mut serial = false;
    let mut json_out = None;
    let mut outcomes_csv = None;
    let mut verdicts_csv = None;
    let mut require_accept = false;

    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--table" => {
                let value = args.next().ok_or("--table requires an IAMC csv path")?;
                table = Some(PathBuf::from(value));
            }
            "--criteria" => {
                let value = args
                    .next()
                    .ok_or("--criteria requires a json or yaml path")?;
                criteria = Some(PathBuf::from(value));
            }
            "--policy" => {
                let value = args.next().ok_or("--policy requires a policy name")?;
                policy = value.parse()?;
            }
            "--serial" => {
                serial = true;
            }
            "--json-out" => {
                let value = args.next().ok_or("--json-out requires a file path")?;
                json_out = Some(PathBuf::from(value));
            }
            "--outcomes-csv" => {
                let value = args.next().ok_or("--outcomes-csv requires a file path")?;
                outcomes_csv = Some(PathBuf::from(value));
            }
            "--verdicts-csv" => {
                let value = args.next().ok_or("--verdicts-csv requires a file path")?;
                verdicts_csv = Some(PathBuf::from(value));
            }
            "--require-accept" => {
                require_accept = true;
            }
            "--help" | "-h" => {
                print_help();
                std::process::exit(0);
            }
            other => return Err(format!("unknown argument: {other}").into()),
        }
    }

    Ok(CliArgs {
        table: table.ok_or("--table is required")?,
        criteria: criteria.ok_or("--criteria is required")?,
        policy,
        serial,
        json_out,
        outcomes_csv,
        verdicts_csv,
        require_accept,
    })
}

fn print_help() {
    println!(
        "iv-vet\n\
         Usage:\n\
         \tiv-vet --table scenarios.csv --criteria criteria.yaml [--policy any-fatal-reject] [--json-out out/report.json]\n\
         Options:\n\
         \t--table <path>         IAMC wide-format csv (model,scenario,region,variable,unit,<years>)\n\
         \t--criteria <path>      criterion library (.json, .yaml or .yml)\n\
         \t--policy <name>        any-fatal-reject (default), strict-all-pass or weighted-severity\n\
         \t--serial               evaluate on the calling thread only\n\
         \t--json-out <path>      write the full report as JSON\n\
         \t--outcomes-csv <path>  write one row per (scenario, criterion) outcome\n\
         \t--verdicts-csv <path>  write one row per scenario verdict\n\
         \t--require-accept       exit 1 unless every scenario is accepted\n\
         \t-h, --help             show this help"
    );
}
