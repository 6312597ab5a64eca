//! Command implementations over the session core

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use serde_json::Value;

use wishare_core::storage::{FileStorage, MemoryStorage, Storage};
use wishare_core::{ApiClient, AuthSession, Config, SessionStatus};

pub struct App {
    config: Config,
    session: Arc<AuthSession>,
    client: ApiClient,
}

impl App {
    /// Open durable storage and this invocation's tab storage
    pub fn open(config: Config, tab: Option<String>) -> anyhow::Result<Self> {
        let dir = config
            .session
            .storage_dir()
            .context("no storage directory available")?;

        let durable: Arc<dyn Storage> = Arc::new(FileStorage::durable(&dir));
        let tab_storage: Arc<dyn Storage> = match tab {
            Some(ref id) => Arc::new(FileStorage::for_tab(&dir, id)),
            None => Arc::new(MemoryStorage::new()),
        };
        let tab_id = tab.unwrap_or_else(|| format!("ephemeral-{:08x}", rand::random::<u32>()));
        tracing::debug!(tab = %tab_id, storage = %dir.display(), "Opened session storage");

        let session = Arc::new(AuthSession::new(durable, tab_storage, config.session.clone()));
        let client = ApiClient::from_config(&config.api, session.clone())?;

        Ok(Self {
            config,
            session,
            client,
        })
    }

    pub async fn login(&self, username: &str, password: &str, user_id: Option<&str>) -> anyhow::Result<()> {
        let ns = self.client.login(username, password, user_id).await?;
        println!("Logged in as {} ({})", username, ns);
        Ok(())
    }

    pub async fn logout(&self) -> anyhow::Result<()> {
        let ns = self.session.namespace();
        self.client.logout().await?;
        println!("Logged out ({})", ns);
        Ok(())
    }

    pub fn status(&self, json: bool) -> anyhow::Result<()> {
        let status = self.session.status();

        if json {
            let mut value = serde_json::to_value(&status)?;
            value["state"] = serde_json::to_value(self.session.state())?;
            if let Some(debug) = self.session.debug_view() {
                value["debug"] = serde_json::to_value(debug)?;
            }
            println!("{}", serde_json::to_string_pretty(&value)?);
        } else {
            println!("{}", render_status(&status, &format!("{:?}", self.session.state())));
        }
        Ok(())
    }

    pub async fn refresh(&self) -> anyhow::Result<()> {
        self.client.refresh().await?;
        println!("Token refreshed");
        Ok(())
    }

    pub async fn whoami(&self) -> anyhow::Result<()> {
        let profile: Value = self.client.profile().await?;
        println!("{}", serde_json::to_string_pretty(&profile)?);
        Ok(())
    }

    pub async fn check(&self) -> anyhow::Result<()> {
        match self.client.restore::<Value>().await? {
            Some(profile) => {
                println!("Session valid ({})", self.session.namespace());
                println!("{}", serde_json::to_string_pretty(&profile)?);
            }
            None => println!("No valid session"),
        }
        Ok(())
    }

    pub fn show_config(&self, write: bool, path: Option<&Path>) -> anyhow::Result<()> {
        if write {
            match path {
                Some(path) => self.config.save_to(path)?,
                None => self.config.save()?,
            }
            tracing::info!("Config written");
        }
        print!("{}", self.config.to_toml()?);
        Ok(())
    }

    pub async fn monitor(&self, interval: Option<Duration>, duration: Option<Duration>) -> anyhow::Result<()> {
        let interval = interval.unwrap_or_else(|| self.config.session.monitor_interval());

        let monitor = self.session.monitor().on_tick(|status| {
            if let Ok(line) = serde_json::to_string(status) {
                println!("{}", line);
            }
        });
        let handle = monitor.start(interval);

        let deadline = async {
            match duration {
                Some(d) => tokio::time::sleep(d).await,
                None => std::future::pending().await,
            }
        };

        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = deadline => {}
        }

        handle.stop();
        Ok(())
    }
}

fn render_status(status: &SessionStatus, state: &str) -> String {
    let mut lines = vec![
        format!("namespace: {}", status.namespace),
        format!("user id:   {}", status.user_id.as_deref().unwrap_or("-")),
        format!("state:     {}", state),
        format!("valid:     {}", status.are_valid),
    ];

    lines.push(format!(
        "access:    {}",
        describe_token(status.tokens.has_access, status.access_expires_in_secs)
    ));
    lines.push(format!(
        "refresh:   {}",
        describe_token(status.tokens.has_refresh, status.refresh_expires_in_secs)
    ));
    lines.push(format!("checked:   {}", status.timestamp.format("%H:%M:%S")));

    lines.join("\n")
}

fn describe_token(present: bool, expires_in_secs: Option<i64>) -> String {
    match (present, expires_in_secs) {
        (false, _) => "missing".to_string(),
        (true, None) => "undecodable".to_string(),
        (true, Some(secs)) if secs <= 0 => format!("expired {} ago", human(-secs)),
        (true, Some(secs)) => format!("expires in {}", human(secs)),
    }
}

fn human(secs: i64) -> String {
    match secs {
        s if s < 60 => format!("{}s", s),
        s if s < 3600 => format!("{} min", s / 60),
        s if s < 86400 => format!("{} h", s / 3600),
        s => format!("{} days", s / 86400),
    }
}
