//! Command-line probe for the auth core
//!
//! ```text
//! auth_probe status          show the restored session
//! auth_probe login           sign in through the browser, then paste the link
//! auth_probe logout          clear the stored session
//! auth_probe <deep-link>     complete a callback, as if the OS launched us
//! ```
//!
//! Logs at `info` by default; set `RUST_LOG=debug` for the full trace.

use glint_core::auth::{AuthManager, AuthStateEvent, AuthStatus};
use glint_core::load_config;
use log::error;
use std::process::ExitCode;

fn print_status(status: &AuthStatus) {
    match serde_json::to_string_pretty(&AuthStateEvent::from(status)) {
        Ok(json) => println!("{}", json),
        Err(e) => error!("Failed to render status: {}", e),
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let command = args.first().map(String::as_str).unwrap_or("status");

    let config = load_config();
    let manager = match AuthManager::new(config) {
        Ok(manager) => manager,
        Err(e) => {
            error!("Failed to init auth: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let status = match command {
        "status" => manager.bootstrap(Vec::<String>::new()).await,
        "logout" => {
            manager.bootstrap(Vec::<String>::new()).await;
            if let Err(e) = manager.sign_out().await {
                eprintln!("{}", e.user_message());
                return ExitCode::FAILURE;
            }
            manager.status()
        }
        "login" => {
            manager.bootstrap(Vec::<String>::new()).await;
            if let Err(e) = manager.start_login() {
                eprintln!("{}", e.user_message());
                eprintln!("Sign in at {}", manager.fallback_login_url());
                return ExitCode::FAILURE;
            }
            println!("Paste the glint:// link your browser was sent to:");
            let line = tokio::task::spawn_blocking(|| {
                let mut line = String::new();
                std::io::stdin().read_line(&mut line).map(|_| line)
            })
            .await;
            let link = match line {
                Ok(Ok(link)) => link,
                Ok(Err(e)) => {
                    error!("Failed to read link: {}", e);
                    return ExitCode::FAILURE;
                }
                Err(e) => {
                    error!("Reader task failed: {}", e);
                    return ExitCode::FAILURE;
                }
            };
            if let Err(e) = manager.handle_url(link.trim()).await {
                eprintln!("{}", e.user_message());
            }
            manager.status()
        }
        _ => manager.bootstrap(args.iter().map(String::as_str)).await,
    };

    print_status(&status);
    if matches!(status, AuthStatus::Error(_)) {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}
