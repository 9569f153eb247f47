use crate::app::{Action, App, Outcome, SessionStatus};
use crate::car::Car;
use crate::error::ApiError;
use crate::guard::View;
use crate::transport::Transport;
use anyhow::Result;
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;
use std::path::PathBuf;

/// A parsed shell line
#[derive(Debug, Clone, PartialEq)]
pub enum ShellCommand {
    Exit,
    Help,
    Run(Action),
}

const HELP: &str = "\
Commands:
  /login <username> <password>         - log in
  /register <username> <password>      - create an account and log in
  /logout                              - forget the stored token
  /status                              - show session state
  /cars                                - list cars
  /add <make> <model> <stock> [k=v...] - add a car
  /update <id> <k=v>...                - update fields of a car
  /delete <id>                         - delete a car
  /help                                - show commands
  /exit                                - quit
Quote values containing spaces: /add \"Land Rover\" Defender 3";

/// Parse one shell line. Arguments follow shell quoting rules.
pub fn parse_command(line: &str) -> std::result::Result<ShellCommand, String> {
    let words = shell_words::split(line).map_err(|e| format!("Could not parse command: {}", e))?;
    let Some((cmd, args)) = words.split_first() else {
        return Err("Empty command".to_string());
    };

    let usage = |text: &str| Err(format!("Usage: {}", text));
    let action = match (cmd.as_str(), args) {
        ("/exit" | "/quit", _) => return Ok(ShellCommand::Exit),
        ("/help", _) => return Ok(ShellCommand::Help),
        ("/login", [username, password]) => Action::Login {
            username: username.clone(),
            password: password.clone(),
        },
        ("/login", _) => return usage("/login <username> <password>"),
        ("/register", [username, password]) => Action::Register {
            username: username.clone(),
            password: password.clone(),
        },
        ("/register", _) => return usage("/register <username> <password>"),
        ("/logout", []) => Action::Logout,
        ("/status", []) => Action::Status,
        ("/cars" | "/list", []) => Action::ListCars,
        ("/add", [make, model, stock, extra @ ..]) => {
            Action::add(make, model, stock, extra).map_err(|e| e.to_string())?
        }
        ("/add", _) => return usage("/add <make> <model> <stock> [key=value...]"),
        ("/update", [id, pairs @ ..]) if !pairs.is_empty() => {
            Action::update(id, pairs).map_err(|e| e.to_string())?
        }
        ("/update", _) => return usage("/update <id> <key=value>..."),
        ("/delete", [id]) => Action::DeleteCar { id: id.clone() },
        ("/delete", _) => return usage("/delete <id>"),
        (other, _) if !other.starts_with('/') => {
            return Err("Commands start with '/'. Type /help for a list.".to_string())
        }
        (other, _) => return Err(format!("Unknown command: {}. Type /help for a list.", other)),
    };

    Ok(ShellCommand::Run(action))
}

/// Run a single action and print its result
pub fn run_once<T: Transport>(app: &App<T>, action: Action) -> Result<()> {
    let outcome = app.run(action)?;
    println!("{}", render_outcome(&outcome));
    Ok(())
}

pub fn run_repl<T: Transport>(app: App<T>, history: Option<PathBuf>) -> Result<()> {
    let mut rl = DefaultEditor::new()?;
    if let Some(path) = &history {
        // Missing history on first run is expected
        let _ = rl.load_history(path);
    }

    println!("carstock - type /help for commands, /exit to quit");

    loop {
        let view = app.check_session();
        match rl.readline(&format!("{}> ", view)) {
            Ok(line) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }

                // Never write credentials to the history file
                if !line.starts_with("/login") && !line.starts_with("/register") {
                    rl.add_history_entry(line)?;
                }

                match parse_command(line) {
                    Ok(ShellCommand::Exit) => break,
                    Ok(ShellCommand::Help) => println!("{}", HELP),
                    Ok(ShellCommand::Run(action)) => match app.run(action) {
                        Ok(outcome) => println!("{}", render_outcome(&outcome)),
                        Err(e) => report_error(&e),
                    },
                    Err(msg) => eprintln!("{}", msg),
                }
            }
            Err(ReadlineError::Interrupted | ReadlineError::Eof) => break,
            Err(e) => {
                eprintln!("Input error: {}", e);
                break;
            }
        }
    }

    if let Some(path) = &history {
        if let Err(e) = rl.save_history(path) {
            tracing::warn!(error = %e, "could not save shell history");
        }
    }

    Ok(())
}

fn report_error(err: &ApiError) {
    match err {
        ApiError::Server { status, message } => {
            eprintln!("Error ({}):", status);
            for line in message.lines() {
                eprintln!("  {}", line);
            }
        }
        other => eprintln!("Error: {}", other),
    }
}

pub fn render_outcome(outcome: &Outcome) -> String {
    match outcome {
        Outcome::Done(message) => message.clone(),
        Outcome::Status(status) => render_status(status),
        Outcome::Cars(cars) => render_cars(cars),
        Outcome::Record(value) => {
            if value.as_object().is_some_and(|m| m.is_empty()) {
                "OK".to_string()
            } else {
                serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string())
            }
        }
    }
}

fn render_status(status: &SessionStatus) -> String {
    let mut out = String::new();
    out.push_str(&format!(
        "Logged in: {}\n",
        if status.logged_in { "yes" } else { "no" }
    ));
    if status.logged_in {
        out.push_str(&format!(
            "Token: {}\n",
            if status.token_valid { "valid" } else { "expired or malformed" }
        ));
        if let Some(expires) = status.expires_at {
            out.push_str(&format!("Expires: {}\n", expires.format("%Y-%m-%d %H:%M:%S UTC")));
        }
    }
    out.push_str(&format!("View: {}", status.view));
    out
}

/// Plain aligned table: id, make, model, stock
pub fn render_cars(cars: &[Car]) -> String {
    if cars.is_empty() {
        return "No cars.".to_string();
    }

    let rows: Vec<[String; 4]> = cars
        .iter()
        .map(|car| {
            [
                car.id.as_ref().map(|id| id.to_string()).unwrap_or_default(),
                car.make.clone(),
                car.model.clone(),
                car.stock.to_string(),
            ]
        })
        .collect();

    let header = ["ID", "MAKE", "MODEL", "STOCK"];
    let mut widths = header.map(str::len);
    for row in &rows {
        for (w, cell) in widths.iter_mut().zip(row.iter()) {
            *w = (*w).max(cell.chars().count());
        }
    }

    let format_row = |cells: [&str; 4]| {
        format!(
            "{:<w0$}  {:<w1$}  {:<w2$}  {:>w3$}",
            cells[0],
            cells[1],
            cells[2],
            cells[3],
            w0 = widths[0],
            w1 = widths[1],
            w2 = widths[2],
            w3 = widths[3]
        )
        .trim_end()
        .to_string()
    };

    let mut lines = vec![format_row(header)];
    for row in &rows {
        lines.push(format_row([
            row[0].as_str(),
            row[1].as_str(),
            row[2].as_str(),
            row[3].as_str(),
        ]));
    }
    lines.join("\n")
}

/// Initial view for the shell
pub fn initial_view(logged_in: bool) -> View {
    if logged_in {
        View::Cars
    } else {
        View::Login
    }
}
