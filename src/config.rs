use derive_builder::Builder;
use secrecy::SecretString;
use serde::Deserialize;
use serde_with::{DurationSeconds, serde_as};
use std::time::Duration;
use url::Url;

const DEFAULT_ENDPOINT: &str = "https://firestore.googleapis.com/v1/";

fn default_endpoint() -> Url {
    Url::parse(DEFAULT_ENDPOINT).expect("static endpoint")
}

fn default_database() -> String {
    String::from("(default)")
}

fn default_retry_duration() -> Duration {
    Duration::from_secs(30)
}

fn default_page_size() -> u32 {
    300
}

#[serde_as]
#[derive(Deserialize, Debug, Clone, Builder)]
#[builder(build_fn(validate = "Self::validate"))]
pub struct Config {
    #[builder(setter(into))]
    pub project_id: String,

    #[serde(default = "default_database")]
    #[builder(setter(into), default = "default_database()")]
    pub database: String,

    #[serde(default = "default_endpoint")]
    #[builder(default = "default_endpoint()")]
    pub endpoint: Url,

    /// `host:port` of a local emulator; overrides `endpoint` and `token`.
    #[serde(default)]
    #[builder(setter(into, strip_option), default)]
    pub emulator_host: Option<String>,

    #[serde(default)]
    #[builder(setter(into, strip_option), default)]
    pub token: Option<SecretString>,

    #[serde_as(as = "DurationSeconds<u64>")]
    #[serde(default = "default_retry_duration")]
    #[builder(default = "default_retry_duration()")]
    pub retry_duration: Duration,

    #[serde(default = "default_page_size")]
    #[builder(default = "default_page_size()")]
    pub page_size: u32,
}

impl ConfigBuilder {
    fn validate(&self) -> Result<(), String> {
        match &self.project_id {
            Some(project) if project.is_empty() => Err(String::from("project_id is empty")),
            _ => Ok(()),
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, config::ConfigError> {
        config::Config::builder()
            .add_source(config::Environment::with_prefix("DOCSTORE"))
            .build()
            .and_then(|c| c.try_deserialize::<Config>())
    }

    /// Base url the REST paths are joined onto.
    pub fn base(&self) -> Result<Url, url::ParseError> {
        match &self.emulator_host {
            Some(host) => Url::parse(&format!("http://{host}/v1/")),
            None => Ok(self.endpoint.clone()),
        }
    }

    /// `projects/{project}/databases/{database}/documents`
    pub fn documents_root(&self) -> String {
        format!(
            "projects/{}/databases/{}/documents",
            self.project_id, self.database
        )
    }
}
