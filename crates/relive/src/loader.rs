//! Load testing: many logical playback sessions polling one source, with a
//! shared worker pool and a configurable session churn rate.

use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{TimeDelta, Utc};
use rand::seq::SliceRandom;
use reqwest::header::{CONTENT_TYPE, DATE, IF_MODIFIED_SINCE, USER_AGENT};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use tokio::sync::{mpsc, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use url::Url;

use crate::checker::DEFAULT_USER_AGENT;
use crate::error::{ReliveError, ReliveResult};

const CONNECT_TIMEOUT: StdDuration = StdDuration::from_secs(5);

/// Ramp-up pace when opening the configured number of sessions.
const SESSION_RAMP_DELAY: StdDuration = StdDuration::from_millis(10);

#[derive(Debug, Clone)]
pub struct LoaderConfig {
    pub name: String,
    pub source_url: Url,
    pub poll_interval: StdDuration,
    /// Number of concurrent logical sessions.
    pub sessions: usize,
    /// Average session restarts per hour per session.
    pub restarts_per_hour: f64,
    /// Give each session its own connection pool.
    pub single_connection: bool,
    pub user_agent: String,
}

impl LoaderConfig {
    pub fn new(name: impl Into<String>, source_url: Url) -> Self {
        LoaderConfig {
            name: name.into(),
            source_url,
            poll_interval: StdDuration::from_secs(5),
            sessions: 1,
            restarts_per_hour: 0.0,
            single_connection: false,
            user_agent: DEFAULT_USER_AGENT.to_string(),
        }
    }
}

/// One logical playback session.
pub struct Session {
    source_url: Url,
    /// Present once the source answered with a session redirect.
    session_url: Option<Url>,
    started: Option<chrono::DateTime<Utc>>,
    last_date: Option<String>,
    /// Dedicated client in single-connection mode.
    client: Option<Client>,
}

impl Session {
    fn new(source_url: Url, single_connection: bool) -> ReliveResult<Self> {
        let client = if single_connection {
            Some(
                Client::builder()
                    .connect_timeout(CONNECT_TIMEOUT)
                    .pool_max_idle_per_host(1)
                    .build()?,
            )
        } else {
            None
        };
        Ok(Session {
            source_url,
            session_url: None,
            started: None,
            last_date: None,
            client,
        })
    }
}

#[derive(Deserialize)]
struct SessionInfo {
    #[serde(rename = "MediaUrl", default)]
    media_url: String,
}

type SharedSession = Arc<Mutex<Session>>;

pub struct StreamLoader {
    config: LoaderConfig,
    queue: mpsc::Sender<Option<SharedSession>>,
    sessions: Arc<RwLock<Vec<SharedSession>>>,
    cancel: CancellationToken,
    workers: Vec<JoinHandle<()>>,
    ramp_up: Option<JoinHandle<()>>,
}

impl StreamLoader {
    /// Start the worker pool (`max(sessions / 10, 1)` fetchers) and begin
    /// ramping up sessions in the background.
    pub fn new(config: LoaderConfig) -> ReliveResult<Self> {
        let client = Client::builder().connect_timeout(CONNECT_TIMEOUT).build()?;
        let (queue, receiver) = mpsc::channel(2 * config.sessions.max(1));
        let sessions = Arc::new(RwLock::new(Vec::with_capacity(config.sessions)));

        let receiver = Arc::new(Mutex::new(receiver));
        let mut workers = Vec::new();
        let worker = Arc::new(Fetcher {
            client: client.clone(),
            user_agent: config.user_agent.clone(),
        });
        for _ in 0..(config.sessions / 10).max(1) {
            workers.push(tokio::spawn(worker.clone().run(receiver.clone())));
        }

        let ramp_sessions = sessions.clone();
        let ramp_url = config.source_url.clone();
        let ramp_count = config.sessions;
        let single_connection = config.single_connection;
        let ramp_up = tokio::spawn(async move {
            for _ in 0..ramp_count {
                match Session::new(ramp_url.clone(), single_connection) {
                    Ok(session) => {
                        ramp_sessions
                            .write()
                            .await
                            .push(Arc::new(Mutex::new(session)));
                    }
                    Err(e) => error!("create session: {e}"),
                }
                tokio::time::sleep(SESSION_RAMP_DELAY).await;
            }
        });

        Ok(StreamLoader {
            config,
            queue,
            sessions,
            cancel: CancellationToken::new(),
            workers,
            ramp_up: Some(ramp_up),
        })
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Poll until cancelled: every tick closes the due share of sessions
    /// and enqueues the rest for a manifest fetch.
    pub async fn run(&mut self) -> ReliveResult<()> {
        if let Err(e) = self.fetch_all_manifests().await {
            error!(channel = %self.config.name, "initial fetch: {e}");
            return Err(e);
        }
        let mut ticker = tokio::time::interval(self.config.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await;
        let cancel = self.cancel.clone();
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    if let Err(e) = self.fetch_all_manifests().await {
                        error!(channel = %self.config.name, "manifest fetch: {e}");
                    }
                }
            }
        }
        debug!("close ticker");
        Ok(())
    }

    pub async fn stop(&mut self) {
        self.cancel.cancel();
        if let Some(ramp) = self.ramp_up.take() {
            ramp.abort();
        }
        for _ in 0..self.workers.len() {
            let _ = self.queue.send(None).await;
        }
        for handle in self.workers.drain(..) {
            let _ = handle.await;
        }
    }

    async fn fetch_all_manifests(&self) -> ReliveResult<()> {
        info!("queue capacity left {}", self.queue.capacity());
        self.close_sessions().await;
        let sessions = self.sessions.read().await;
        for session in sessions.iter() {
            if self.queue.try_send(Some(session.clone())).is_err() {
                error!("queue full");
                return Err(ReliveError::QueueFull);
            }
        }
        Ok(())
    }

    /// Close the share of sessions due this tick, with dithering so
    /// fractional quotas still average out over time.
    async fn close_sessions(&self) {
        let sessions = self.sessions.read().await;
        let kill_quota = self.config.restarts_per_hour / 3600.0
            * self.config.poll_interval.as_secs_f64();
        let mut to_kill = (sessions.len() as f64 * kill_quota + rand::random::<f64>() - 0.5)
            .round() as i64;
        debug!(
            "rate {} per sec, {kill_quota} per iteration, {} sessions -> close {to_kill}",
            self.config.restarts_per_hour / 3600.0,
            sessions.len(),
        );
        if to_kill <= 0 {
            return;
        }
        let mut order: Vec<usize> = (0..sessions.len()).collect();
        order.shuffle(&mut rand::rng());
        for index in order {
            if to_kill == 0 {
                break;
            }
            let mut session = sessions[index].lock().await;
            if let Some(url) = session.session_url.take() {
                let open_for = session
                    .started
                    .map(|started| Utc::now() - started)
                    .unwrap_or_else(TimeDelta::zero);
                info!("closing session {url} after {open_for}");
                to_kill -= 1;
            }
        }
    }
}

struct Fetcher {
    client: Client,
    user_agent: String,
}

impl Fetcher {
    async fn run(
        self: Arc<Self>,
        queue: Arc<Mutex<mpsc::Receiver<Option<SharedSession>>>>,
    ) {
        loop {
            let item = queue.lock().await.recv().await;
            let Some(Some(session)) = item else { break };
            if let Err(e) = self.fetch_manifest(&session).await {
                debug!("session fetch: {e}");
            }
        }
        debug!("close fetcher");
    }

    /// One manifest poll for one session. The body is discarded; only the
    /// session redirect and the Date gate are interpreted.
    async fn fetch_manifest(&self, session: &SharedSession) -> ReliveResult<()> {
        let mut session = session.lock().await;
        let url = session
            .session_url
            .clone()
            .unwrap_or_else(|| session.source_url.clone());

        let client = session.client.as_ref().unwrap_or(&self.client);
        let mut request = client.get(url.clone()).header(USER_AGENT, &self.user_agent);
        if let Some(date) = &session.last_date {
            request = request.header(IF_MODIFIED_SINCE, date);
        }
        let response = request.send().await.map_err(|e| {
            error!(source = %url, "do manifest request: {e}");
            e
        })?;
        let status = response.status();
        if status == StatusCode::NOT_MODIFIED {
            debug!(url = %url, "no update");
            return Ok(());
        }
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();
        let date = response
            .headers()
            .get(DATE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let body = response.bytes().await?;
        if status != StatusCode::OK {
            warn!(status = %status, url = %url, "manifest fetch");
            return Err(ReliveError::HttpStatus(status));
        }
        if content_type.starts_with("application/json") || content_type.starts_with("text/plain")
        {
            let info: SessionInfo = serde_json::from_slice(&body)?;
            if info.media_url.is_empty() {
                error!("no MediaUrl or empty");
                return Err(ReliveError::MissingMediaUrl);
            }
            let session_url = Url::parse(&info.media_url)?;
            info!(url = %info.media_url, "open session");
            session.session_url = Some(session_url);
            session.started = Some(Utc::now());
            session.last_date = None;
            return Ok(());
        }
        if date.is_some() && date == session.last_date {
            debug!(url = %url, "no update");
            return Ok(());
        }
        session.last_date = date;
        Ok(())
    }
}
