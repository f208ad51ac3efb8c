use std::env;
use std::fs;
use std::io::{self, BufWriter, Write};
use std::process::ExitCode;

use dynval_logger::{parse_function_log, FunctionLogLine, MemlogReader};
use tracing_subscriber::EnvFilter;

const USAGE: &str = "usage: dynval_logger <memlog> [function-log]";

fn main() -> ExitCode {
    let (writer, _guard) = tracing_appender::non_blocking(io::stderr());
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(writer)
        .init();

    let args: Vec<String> = env::args().skip(1).collect();
    let Some(memlog_path) = args.first() else {
        eprintln!("{USAGE}");
        return ExitCode::from(2);
    };

    match dump(memlog_path, args.get(1).map(String::as_str)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "dump failed");
            ExitCode::FAILURE
        }
    }
}

/// Prints the function log, if given, then every record in the memlog.
fn dump(memlog_path: &str, function_log_path: Option<&str>) -> io::Result<()> {
    let data = fs::read(memlog_path)?;
    let stdout = io::stdout();
    let mut out = BufWriter::new(stdout.lock());

    if let Some(path) = function_log_path {
        let text = fs::read_to_string(path)?;
        for line in parse_function_log(&text) {
            match line {
                FunctionLogLine::Unit(name) => writeln!(out, "{name}")?,
                FunctionLogLine::Taint(region) => writeln!(out, "  {region}")?,
            }
        }
        writeln!(out, "--")?;
    }

    let mut reader = MemlogReader::new(&data);
    for (i, entry) in reader.by_ref().enumerate() {
        writeln!(out, "{i:8}  {entry}")?;
    }
    if reader.remaining() > 0 {
        tracing::warn!(bytes = reader.remaining(), "memlog ends with a partial record");
    }
    out.flush()
}
