//! Issue user tokens accepted by the proxy.
//!
//! Usage: ollama-proxy-token [--jwt-key KEY] [--email EMAIL] <user>
//!
//! The key and email fall back to `$JWT_KEY` and `$USER_EMAIL`.

use std::env;
use std::process::ExitCode;

use ollama_proxy::auth::{encode_token, Claims};

struct Args {
    jwt_key: Option<String>,
    email: Option<String>,
    user: Option<String>,
}

fn parse_args(args: impl IntoIterator<Item = String>) -> Result<Args, String> {
    let mut parsed = Args {
        jwt_key: None,
        email: None,
        user: None,
    };
    let mut args = args.into_iter();
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "-k" | "--jwt-key" => {
                parsed.jwt_key = Some(args.next().ok_or("--jwt-key requires a value")?);
            }
            "-e" | "--email" => {
                parsed.email = Some(args.next().ok_or("--email requires a value")?);
            }
            flag if flag.starts_with('-') => return Err(format!("Unknown option: {}", flag)),
            _ if parsed.user.is_some() => return Err(format!("Unexpected argument: {}", arg)),
            _ => parsed.user = Some(arg),
        }
    }
    Ok(parsed)
}

fn main() -> ExitCode {
    let args = match parse_args(env::args().skip(1)) {
        Ok(args) => args,
        Err(e) => {
            eprintln!("{}", e);
            eprintln!("Usage: ollama-proxy-token [--jwt-key KEY] [--email EMAIL] <user>");
            return ExitCode::from(2);
        }
    };

    let Some(user) = args.user else {
        eprintln!("Usage: ollama-proxy-token [--jwt-key KEY] [--email EMAIL] <user>");
        return ExitCode::from(2);
    };
    let Some(jwt_key) = args.jwt_key.or_else(|| env::var("JWT_KEY").ok()) else {
        eprintln!("No JWT key given (use --jwt-key or set JWT_KEY)");
        return ExitCode::from(2);
    };
    let email = args.email.or_else(|| env::var("USER_EMAIL").ok());

    let claims = Claims::new(&user, email.as_deref());
    match serde_json::to_string_pretty(&claims) {
        Ok(json) => eprintln!("{}", json),
        Err(e) => eprintln!("Failed to serialize claims: {}", e),
    }

    match encode_token(&claims, &jwt_key) {
        Ok(token) => {
            println!("{}", token);
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("Failed to encode token: {}", e);
            ExitCode::FAILURE
        }
    }
}
