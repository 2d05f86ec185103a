//! Telematics server client: session, file locate and task status
use async_trait::async_trait;
use chrono::Datelike;
use evidence_core::config::RemoteConfig;
use evidence_core::{
    AlarmReference, EvidenceError, EvidenceResult, FileEntry, FileLocator, TaskStatusResponse,
    TaskStatusSource, TransportError, VideoWindow,
};
use reqwest::StatusCode;
use serde::Deserialize;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

const LAST_SECOND_OF_DAY: i64 = 86_399;
/// Location selector for "device storage" in the file-locate query.
const LOCATION_DEVICE: u32 = 1;
const RECORD_TYPE_ANY: i32 = -1;
const FILE_ATTR_VIDEO: u32 = 2;
const LOCATE_CHANNEL: u32 = 2;

pub struct TelematicsClient {
    pub(crate) http: reqwest::Client,
    pub(crate) config: RemoteConfig,
    /// Current token; replaced when the server stops accepting it.
    session: RwLock<Option<String>>,
}

#[derive(Debug, Deserialize)]
struct LoginResponse {
    result: i64,
    jsession: Option<String>,
}

#[derive(Debug, Deserialize)]
struct LocateResponse {
    result: i64,
    #[serde(default)]
    files: Option<Vec<FileEntry>>,
}

enum Located {
    Files(Vec<FileEntry>),
    /// Non-zero `result` or HTTP 401, either of which may mean an expired session.
    Refused(String),
}

impl TelematicsClient {
    pub fn new(config: RemoteConfig) -> EvidenceResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .build()
            .map_err(|e| EvidenceError::Config(format!("http client: {e}")))?;
        let session = RwLock::new(config.session.clone());
        Ok(Self {
            http,
            config,
            session,
        })
    }

    pub(crate) fn endpoint(base: &str, path: &str) -> String {
        format!("{}{}", base.trim_end_matches('/'), path)
    }

    /// Session token, logging in on first use when credentials are configured.
    pub async fn session(&self) -> EvidenceResult<Option<String>> {
        if let Some(token) = self.session.read().await.as_ref() {
            return Ok(Some(token.clone()));
        }

        let mut session = self.session.write().await;
        if let Some(token) = session.as_ref() {
            return Ok(Some(token.clone()));
        }
        let Some((account, password)) = self.credentials() else {
            return Ok(None);
        };
        let token = self.login(account, password).await?;
        *session = Some(token.clone());
        Ok(Some(token))
    }

    /// Replace `stale` with a freshly logged-in token.
    ///
    /// Returns `None` when no credentials are configured. A concurrent caller
    /// that already replaced `stale` wins and its token is returned.
    pub async fn renew_session(&self, stale: &str) -> EvidenceResult<Option<String>> {
        let Some((account, password)) = self.credentials() else {
            return Ok(None);
        };

        let mut session = self.session.write().await;
        if let Some(current) = session.as_ref().filter(|t| t.as_str() != stale) {
            return Ok(Some(current.clone()));
        }
        *session = None;
        let token = self.login(account, password).await?;
        *session = Some(token.clone());
        Ok(Some(token))
    }

    /// Drop `stale` so the next request logs in again.
    pub(crate) async fn forget_session(&self, stale: &str) {
        if self.credentials().is_none() {
            return;
        }
        let mut session = self.session.write().await;
        if session.as_deref() == Some(stale) {
            *session = None;
        }
    }

    fn credentials(&self) -> Option<(&str, &str)> {
        match (&self.config.account, &self.config.password) {
            (Some(account), Some(password)) => Some((account.as_str(), password.as_str())),
            _ => None,
        }
    }

    async fn login(&self, account: &str, password: &str) -> EvidenceResult<String> {
        let url = Self::endpoint(&self.config.base_url, &self.config.login_path);
        let response: LoginResponse = self
            .http
            .get(&url)
            .query(&[("account", account), ("password", password)])
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| EvidenceError::RemoteUnavailable(format!("login: {e}")))?
            .json()
            .await
            .map_err(|e| EvidenceError::RemoteUnavailable(format!("login response: {e}")))?;

        match (response.result, response.jsession) {
            (0, Some(token)) if !token.is_empty() => {
                info!(account, "telematics session established");
                Ok(token)
            }
            (code, _) => Err(EvidenceError::RemoteUnavailable(format!(
                "login rejected with result {code}"
            ))),
        }
    }
}

#[async_trait]
impl FileLocator for TelematicsClient {
    async fn locate(
        &self,
        alarm: &AlarmReference,
        window: &VideoWindow,
    ) -> EvidenceResult<Vec<FileEntry>> {
        let day = alarm.alarm_time.date_naive();
        let query: Vec<(&str, String)> = vec![
            ("DevIDNO", alarm.device_id.clone()),
            ("LOC", LOCATION_DEVICE.to_string()),
            ("CHN", LOCATE_CHANNEL.to_string()),
            ("YEAR", day.year().to_string()),
            ("MON", day.month().to_string()),
            ("DAY", day.day().to_string()),
            ("RECTYPE", RECORD_TYPE_ANY.to_string()),
            ("FILEATTR", FILE_ATTR_VIDEO.to_string()),
            ("BEG", window.start_offset_seconds.clamp(0, LAST_SECOND_OF_DAY).to_string()),
            ("END", window.end_offset_seconds.clamp(0, LAST_SECOND_OF_DAY).to_string()),
        ];
        let url = Self::endpoint(&self.config.base_url, &self.config.locate_path);
        debug!(guid = %alarm.guid, device_id = %alarm.device_id, "locating recorded files");

        let token = self.session().await?;
        let files = match self.request_files(&url, &query, token.as_deref()).await? {
            Located::Files(files) => files,
            Located::Refused(reason) => {
                let fresh = match &token {
                    Some(stale) => self.renew_session(stale).await?,
                    None => None,
                };
                let Some(fresh) = fresh else {
                    return Err(EvidenceError::RemoteUnavailable(reason));
                };
                warn!(guid = %alarm.guid, reason = %reason, "file locate refused, retrying with a new session");
                match self.request_files(&url, &query, Some(&fresh)).await? {
                    Located::Files(files) => files,
                    Located::Refused(reason) => return Err(EvidenceError::RemoteUnavailable(reason)),
                }
            }
        };

        info!(guid = %alarm.guid, count = files.len(), "recorded files located");
        Ok(files)
    }
}

impl TelematicsClient {
    async fn request_files(
        &self,
        url: &str,
        query: &[(&str, String)],
        token: Option<&str>,
    ) -> EvidenceResult<Located> {
        let mut request = self.http.get(url).query(query);
        if let Some(token) = token {
            request = request.query(&[("jsession", token)]);
        }

        let response = request
            .send()
            .await
            .map_err(|e| EvidenceError::RemoteUnavailable(format!("file locate: {e}")))?;
        if response.status() == StatusCode::UNAUTHORIZED {
            return Ok(Located::Refused("file locate answered 401".to_string()));
        }
        let response: LocateResponse = response
            .error_for_status()
            .map_err(|e| EvidenceError::RemoteUnavailable(format!("file locate: {e}")))?
            .json()
            .await
            .map_err(|e| EvidenceError::RemoteUnavailable(format!("file locate response: {e}")))?;

        if response.result != 0 {
            return Ok(Located::Refused(format!(
                "file locate answered result {}",
                response.result
            )));
        }
        Ok(Located::Files(response.files.unwrap_or_default()))
    }
}

#[async_trait]
impl TaskStatusSource for TelematicsClient {
    async fn fetch_status(&self, task_url: &str) -> Result<TaskStatusResponse, TransportError> {
        let response = self
            .http
            .get(task_url)
            .send()
            .await
            .map_err(|e| TransportError(e.to_string()))?;
        let body = response
            .bytes()
            .await
            .map_err(|e| TransportError(e.to_string()))?;
        serde_json::from_slice(&body)
            .map_err(|e| TransportError(format!("malformed task status: {e}")))
    }
}
