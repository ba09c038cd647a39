use std::io::{BufRead, Write};
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use prakriti_core::meta;
use prakriti_core::types::{LoginCredentials, RegisterData, User};
use tracing::{error, info};

use crate::auth::error::SESSION_EXPIRED_MESSAGE;
use crate::auth::{AuthPhase, NoticeLevel, Provider, SessionEvent, SessionStore};
use crate::config::ClientConfig;

#[derive(Parser, Debug)]
#[command(name = "prakriti")]
#[command(version, about = "Prakriti account session client", long_about = None)]
struct Cli {
    /// Path to a client.toml to use instead of the default one
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log debug output to stderr
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Sign in with e-mail and password
    Login {
        #[arg(short, long)]
        email: String,
        /// Read from stdin when omitted
        #[arg(short, long)]
        password: Option<String>,
    },

    /// Create an account and sign in
    Register {
        #[arg(short, long)]
        username: String,
        #[arg(short, long)]
        email: String,
        #[arg(short, long)]
        display_name: String,
        /// Read from stdin when omitted
        #[arg(short, long)]
        password: Option<String>,
        /// Accept the terms of service
        #[arg(long)]
        agree_to_terms: bool,
    },

    /// Sign in with a Google or Facebook token
    Oauth {
        provider: Provider,
        token: String,
    },

    /// Sign out and forget the stored credentials
    Logout,

    /// Verify the stored session with the server
    Whoami,

    /// Rotate the stored credentials
    Refresh,

    /// Show the stored session without contacting the server
    Status,

    /// Stay running and refresh the session ahead of expiry until Ctrl-C
    Watch,

    /// Ask for a password reset e-mail
    ForgotPassword { email: String },

    /// Set a new password with the token from a reset e-mail
    ResetPassword {
        token: String,
        /// Read from stdin when omitted
        #[arg(short, long)]
        password: Option<String>,
    },

    /// Change the password of the signed-in account
    ChangePassword {
        #[arg(long)]
        current: String,
        #[arg(long)]
        new: String,
    },
}

pub fn launch() {
    let cli = Cli::parse();
    if let Err(e) = crate::log::init_logging(cli.verbose) {
        eprintln!("failed to initialize logging: {e}");
    }

    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("error: failed to start runtime: {e}");
            std::process::exit(1);
        }
    };

    if let Err(e) = runtime.block_on(run(cli)) {
        error!("{:#}", e);
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config = match &cli.config {
        Some(path) => ClientConfig::load_from(path)?,
        None => ClientConfig::load()?,
    };
    let store = SessionStore::from_config(&config)?;
    store.restore();

    let result = execute(&store, &config, cli.command).await;
    print_events(&store);
    result
}

async fn execute(store: &SessionStore, config: &ClientConfig, command: Commands) -> Result<()> {
    match command {
        Commands::Login { email, password } => {
            let password = password_or_prompt(password)?;
            store
                .login(&LoginCredentials::new(email, password))
                .await?;
        }
        Commands::Register {
            username,
            email,
            display_name,
            password,
            agree_to_terms,
        } => {
            if !agree_to_terms {
                bail!("registration requires --agree-to-terms");
            }
            let password = password_or_prompt(password)?;
            store
                .register(&RegisterData {
                    username,
                    email,
                    password,
                    display_name,
                    agree_to_terms,
                })
                .await?;
        }
        Commands::Oauth { provider, token } => {
            store.login_with_provider(provider, &token).await?;
        }
        Commands::Logout => store.logout().await,
        Commands::Whoami => match store.check_auth().await? {
            AuthPhase::Authenticated => {
                if let Some(user) = store.view().user() {
                    println!("{}", describe(&user));
                }
            }
            _ => println!("Not logged in"),
        },
        Commands::Refresh => {
            let user = store.refresh_auth().await?;
            println!("Session refreshed for {}", user.username);
        }
        Commands::Status => {
            let session = store.snapshot();
            match session.user.as_ref().filter(|_| session.is_authenticated) {
                Some(user) => println!("{} ({})", describe(user), session.phase),
                None => println!("Not logged in"),
            }
        }
        Commands::Watch => watch(store, config.background_refresh_interval()).await?,
        Commands::ForgotPassword { email } => {
            let message = store.auth().request_password_reset(&email).await?;
            println!("{}", message.as_deref().unwrap_or("Password reset requested"));
        }
        Commands::ResetPassword { token, password } => {
            let password = password_or_prompt(password)?;
            let message = store
                .auth()
                .complete_password_reset(&token, &password)
                .await?;
            println!("{}", message.as_deref().unwrap_or("Password has been reset"));
        }
        Commands::ChangePassword { current, new } => {
            if !store.view().is_authenticated() {
                bail!("not logged in");
            }
            let message = store.auth().change_password(&current, &new).await?;
            println!("{}", message.as_deref().unwrap_or("Password changed"));
            // pick up a refresh the call may have triggered
            store.reconcile();
        }
    }
    Ok(())
}

/// Run the background refresh until interrupted or the session ends
async fn watch(store: &SessionStore, interval: Duration) -> Result<()> {
    if store.check_auth().await? != AuthPhase::Authenticated {
        bail!("not logged in");
    }
    info!("Refreshing ahead of expiry every {:?}", interval);
    let task = store.spawn_background_refresh(interval);

    let interrupt = tokio::signal::ctrl_c();
    tokio::pin!(interrupt);
    let mut ticker = tokio::time::interval(interval);
    let outcome = loop {
        tokio::select! {
            result = &mut interrupt => {
                info!("Received Ctrl+C, stopping");
                break result.context("failed to listen for Ctrl+C");
            }
            _ = ticker.tick() => {
                store.reconcile();
                if !store.view().is_authenticated() {
                    break Ok(());
                }
            }
        }
    };
    task.abort();
    outcome
}

fn print_events(store: &SessionStore) {
    for event in store.events().try_iter() {
        match event {
            SessionEvent::Notice(notice) if notice.level == NoticeLevel::Success => {
                println!("{}", notice.message)
            }
            SessionEvent::Expired => eprintln!("{}", SESSION_EXPIRED_MESSAGE),
            // failures are reported once, through the returned error
            SessionEvent::Notice(_) | SessionEvent::Changed(_) => {}
        }
    }
}

fn describe(user: &User) -> String {
    let mut line = format!("{} <{}>", user.username, user.email);
    if !user.display_name.is_empty() {
        line = format!("{} ({})", line, user.display_name);
    }
    if user.is_admin() {
        line.push_str(" [admin]");
    }
    line
}

fn password_or_prompt(password: Option<String>) -> Result<String> {
    if let Some(password) = password {
        return Ok(password);
    }

    eprint!("{} password: ", meta::NAME);
    std::io::stderr().flush()?;
    let mut line = String::new();
    std::io::stdin()
        .lock()
        .read_line(&mut line)
        .context("failed to read password")?;
    let password = line.trim_end_matches(['\r', '\n']).to_string();
    if password.is_empty() {
        bail!("password must not be empty");
    }
    Ok(password)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::persistence::StoragePersistence;
    use crate::auth::testing::{auth_body, fixture, unauthorized, user_body, Fixture};
    use crate::auth::AuthService;
    use reqwest::StatusCode;
    use std::sync::Arc;

    #[test]
    fn test_parse_oauth_provider() {
        let cli = Cli::try_parse_from(["prakriti", "oauth", "facebook", "fb-token"]).unwrap();
        match cli.command {
            Commands::Oauth { provider, token } => {
                assert_eq!(provider, Provider::Facebook);
                assert_eq!(token, "fb-token");
            }
            other => panic!("unexpected command: {:?}", other),
        }
        assert!(Cli::try_parse_from(["prakriti", "oauth", "myspace", "t"]).is_err());
    }

    #[test]
    fn test_parse_global_flags() {
        let cli = Cli::try_parse_from([
            "prakriti",
            "-v",
            "--config",
            "/tmp/client.toml",
            "login",
            "--email",
            "asha@example.com",
        ])
        .unwrap();
        assert!(cli.verbose);
        assert_eq!(cli.config, Some(PathBuf::from("/tmp/client.toml")));
        assert!(matches!(
            cli.command,
            Commands::Login { password: None, .. }
        ));
    }

    #[test]
    fn test_parse_watch() {
        let cli = Cli::try_parse_from(["prakriti", "watch"]).unwrap();
        assert!(matches!(cli.command, Commands::Watch));
    }

    fn session_store(fx: &Fixture) -> SessionStore {
        SessionStore::new(
            AuthService::new(fx.api.clone()),
            Arc::new(StoragePersistence::new(fx.storage.clone())),
        )
    }

    #[tokio::test]
    async fn test_watch_refuses_without_session() {
        let fx = fixture();
        let store = session_store(&fx);
        store.restore();

        let err = watch(&store, Duration::from_millis(10)).await.unwrap_err();
        assert_eq!(err.to_string(), "not logged in");
        assert!(fx.transport.calls().is_empty());
    }

    #[tokio::test]
    async fn test_watch_ends_when_session_expires() {
        let fx = fixture();
        let mut issued = auth_body("u1", "a1", "r1");
        issued["data"]["expiresIn"] = serde_json::json!(60);
        fx.transport.respond(StatusCode::OK, issued);
        fx.transport.respond(StatusCode::OK, user_body("u1"));
        fx.transport.respond(StatusCode::UNAUTHORIZED, unauthorized());
        let store = session_store(&fx);
        store
            .login(&LoginCredentials::new("u1@example.com", "secret"))
            .await
            .unwrap();

        tokio::time::timeout(
            Duration::from_secs(5),
            watch(&store, Duration::from_millis(10)),
        )
        .await
        .unwrap()
        .unwrap();
        assert_eq!(
            fx.transport.paths(),
            vec!["/auth/login", "/auth/me", "/auth/refresh"]
        );
        assert!(store.events().try_iter().any(|e| e == SessionEvent::Expired));
    }

    #[test]
    fn test_describe_marks_admin() {
        let user: User = serde_json::from_value(serde_json::json!({
            "_id": "u1",
            "username": "asha",
            "email": "asha@example.com",
            "displayName": "Asha",
            "role": "admin"
        }))
        .unwrap();
        assert_eq!(describe(&user), "asha <asha@example.com> (Asha) [admin]");
    }
}
