//! wtty - an interactive ConPTY shell session host for Windows
//!
//! wtty spawns a shell under a Windows pseudo console, streams its output
//! through an SGR decoder, and prints the styled result to the hosting
//! console. It is the flat-rendering counterpart to a full terminal
//! emulator, for hosts that only need styled text.
//!
//! # Quick Start
//!
//! ```text
//! wtty                 # host the configured shell (default: PowerShell)
//! wtty -s cmd.exe      # host a specific shell
//! wtty --check         # verify workspace dependencies and exit
//! ```
//!
//! Configuration lives in `~/.wtty/config.toml`, logs in `~/.wtty/wtty.log`.

mod config;
mod core;
mod deps;
mod ui;

use std::env;
use std::path::PathBuf;

use tracing::info;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use crate::config::Config;

#[cfg(windows)]
use std::time::Duration;

#[cfg(windows)]
use crossterm::event::{self, Event, KeyCode, KeyEventKind, KeyModifiers};

#[cfg(windows)]
use crate::core::ansi::{AnsiDecoder, Rgb};
#[cfg(windows)]
use crate::core::session::{SessionEvent, ShellSession};
#[cfg(windows)]
use crate::ui::{KeyMapper, SegmentRenderer};

/// Version string from Cargo.toml
const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Command-line overrides for the session
#[cfg_attr(not(windows), allow(dead_code))]
struct CliArgs {
    executable: Option<String>,
    arguments: Option<String>,
    working_directory: Option<PathBuf>,
    check: bool,
}

fn print_version() {
    eprintln!("wtty {}", VERSION);
}

fn print_help() {
    eprintln!(
        "wtty {} - an interactive ConPTY shell session host for Windows",
        VERSION
    );
    eprintln!();
    eprintln!("Usage: wtty [OPTIONS]");
    eprintln!();
    eprintln!("Shell options:");
    eprintln!("  (default)             From config.toml, or PowerShell");
    eprintln!("  -s, --shell <EXE>     Shell executable");
    eprintln!("  -a, --args <ARGS>     Argument string passed to the shell");
    eprintln!("  -d, --dir <PATH>      Working directory for the session");
    eprintln!();
    eprintln!("Other options:");
    eprintln!("  --check               Run workspace dependency checks and exit");
    eprintln!("  -v, --version         Show version");
    eprintln!("  -h, --help            Show this help");
    eprintln!();
    eprintln!("Configuration: ~/.wtty/config.toml");
    eprintln!("Log file:      ~/.wtty/wtty.log  (filter with WTTY_LOG)");
    eprintln!();
    eprintln!("Exit: type 'exit' in the shell");
}

fn parse_args() -> Result<CliArgs, String> {
    let args: Vec<String> = env::args().collect();
    let mut cli = CliArgs {
        executable: None,
        arguments: None,
        working_directory: None,
        check: false,
    };
    let mut i = 1;

    while i < args.len() {
        match args[i].as_str() {
            "-h" | "--help" => {
                print_help();
                std::process::exit(0);
            }
            "-v" | "--version" => {
                print_version();
                std::process::exit(0);
            }
            "-s" | "--shell" => {
                i += 1;
                if i >= args.len() {
                    return Err("missing shell argument".to_string());
                }
                cli.executable = Some(args[i].clone());
            }
            "-a" | "--args" => {
                i += 1;
                if i >= args.len() {
                    return Err("missing args argument".to_string());
                }
                cli.arguments = Some(args[i].clone());
            }
            "-d" | "--dir" => {
                i += 1;
                if i >= args.len() {
                    return Err("missing dir argument".to_string());
                }
                cli.working_directory = Some(PathBuf::from(&args[i]));
            }
            "--check" => {
                cli.check = true;
            }
            arg => {
                return Err(format!("unknown argument: {}. Use -h for help.", arg));
            }
        }
        i += 1;
    }

    Ok(cli)
}

/// Initialize logging to ~/.wtty/wtty.log
fn init_logging() {
    let home = env::var_os("USERPROFILE")
        .or_else(|| env::var_os("HOME"))
        .map(PathBuf::from);

    let log_path = home
        .map(|h| h.join(".wtty").join("wtty.log"))
        .unwrap_or_else(|| PathBuf::from("wtty.log"));

    if let Some(parent) = log_path.parent() {
        let _ = std::fs::create_dir_all(parent);
    }

    let log_file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)
        .ok();

    if let Some(file) = log_file {
        let filter =
            EnvFilter::try_from_env("WTTY_LOG").unwrap_or_else(|_| EnvFilter::new("info"));
        let subscriber = FmtSubscriber::builder()
            .with_env_filter(filter)
            .with_writer(std::sync::Mutex::new(file))
            .with_ansi(false)
            .finish();
        let _ = tracing::subscriber::set_global_default(subscriber);
    }
}

/// Run the dependency pre-flight and print each report.
fn run_checks(config: &Config) -> i32 {
    let root = config
        .working_directory
        .clone()
        .unwrap_or_else(deps::default_root);
    println!("workspace root: {}", root.display());

    let reports = deps::builtin_registry().run_all(&root);
    let mut all_ok = true;
    for report in &reports {
        println!();
        println!("{}: {}", report.checker, if report.ok { "ok" } else { "failed" });
        print!("{report}");
        all_ok &= report.ok;
    }

    if all_ok {
        0
    } else {
        1
    }
}

fn main() -> anyhow::Result<()> {
    let args = match parse_args() {
        Ok(args) => args,
        Err(e) => {
            eprintln!("Error: {}", e);
            eprintln!("Use --help for usage information");
            std::process::exit(1);
        }
    };

    init_logging();
    info!("wtty {} starting", VERSION);

    let config = Config::load();

    if args.check {
        std::process::exit(run_checks(&config));
    }

    run_host(args, config)
}

#[cfg(windows)]
fn run_host(args: CliArgs, config: Config) -> anyhow::Result<()> {
    run_terminal(args, config)
}

#[cfg(not(windows))]
fn run_host(_args: CliArgs, _config: Config) -> anyhow::Result<()> {
    eprintln!("wtty requires Windows ConPTY; pseudo-console sessions are unavailable here.");
    Ok(())
}

/// Host the shell session (Windows only)
#[cfg(windows)]
fn run_terminal(args: CliArgs, config: Config) -> anyhow::Result<()> {
    use crossterm::terminal;
    use std::io::Write;

    // Command line overrides config file
    let mut options = config.launch_options();
    if let Some(executable) = args.executable {
        options.executable = executable;
    }
    if let Some(arguments) = args.arguments {
        options.arguments = arguments;
    }
    if let Some(dir) = args.working_directory {
        options.working_directory = Some(dir);
    }

    info!("shell: {} {}", options.executable, options.arguments);

    let (cols, rows) = terminal::size()?;
    info!("terminal size: {}x{}", cols, rows);

    let mut session = ShellSession::new(options);
    session.start(cols, rows)?;

    terminal::enable_raw_mode()?;
    let result = run_main_loop(&mut session, config.default_foreground());
    let _ = terminal::disable_raw_mode();

    session.dispose();

    // Reset console attributes directly
    print!("\x1b[0m");
    let _ = std::io::stdout().flush();

    result
}

/// Main event loop: drain session events, forward input
#[cfg(windows)]
fn run_main_loop(session: &mut ShellSession, default_foreground: Rgb) -> anyhow::Result<()> {
    let mut decoder = AnsiDecoder::new(default_foreground);
    let mut renderer = SegmentRenderer::new();
    let poll_timeout = Duration::from_millis(10);

    loop {
        // Drain whatever the background threads have published
        let events: Vec<SessionEvent> = session.events().try_iter().collect();
        let mut exit_code = None;
        for event in events {
            match event {
                SessionEvent::Output(text) => {
                    let segments = decoder.decode(&text);
                    renderer.print(&segments)?;
                }
                SessionEvent::Exited(code) => exit_code = Some(code),
            }
        }
        if let Some(code) = exit_code {
            info!("session ended with exit code {}", code);
            break;
        }

        if event::poll(poll_timeout)? {
            match event::read()? {
                Event::Key(key_event) => {
                    if key_event.kind != KeyEventKind::Press {
                        continue;
                    }

                    // Ctrl+C interrupts the child, not wtty
                    if key_event.modifiers.contains(KeyModifiers::CONTROL)
                        && key_event.code == KeyCode::Char('c')
                    {
                        session.send_interrupt();
                        continue;
                    }

                    if let Some(bytes) = KeyMapper::map(&key_event) {
                        // Key sequences are ASCII or UTF-8 encoded text
                        if let Ok(text) = String::from_utf8(bytes) {
                            session.send_input(&text);
                        }
                    }
                }

                Event::Resize(cols, rows) => {
                    info!("resize: {}x{}", cols, rows);
                    session.resize(cols, rows);
                }

                _ => {}
            }
        }
    }

    Ok(())
}
