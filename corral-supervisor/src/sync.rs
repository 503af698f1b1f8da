//! Worker configuration push
//!
//! After a worker reports healthy, the supervisor sends it a declarative
//! configuration document, uploads its bound skills and toggles skill
//! support. Each step is independent; failures are collected in a
//! [`SyncReport`] instead of aborting the rest.

use corral_core::model::{SkillDefinition, ToolServer, WorkerDescriptor};
use serde_json::{Value, json};
use std::time::Duration;
use tracing::{debug, warn};

/// What went wrong during one [`ConfigSynchronizer::sync`] run
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SyncReport {
    pub config_pushed: bool,
    pub skills_pushed: Vec<String>,
    pub failures: Vec<String>,
}

impl SyncReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Builds and pushes worker configuration over HTTP
#[derive(Debug, Clone)]
pub struct ConfigSynchronizer {
    client: reqwest::Client,
    public_url: String,
    request_timeout: Duration,
}

impl ConfigSynchronizer {
    pub fn new(public_url: impl Into<String>, request_timeout: Duration) -> Self {
        Self {
            client: reqwest::Client::new(),
            public_url: public_url.into().trim_end_matches('/').to_string(),
            request_timeout,
        }
    }

    fn worker_url(port: u16, path: &str) -> String {
        format!("http://127.0.0.1:{port}{path}")
    }

    /// Configuration document for `worker`
    pub fn build_document(
        &self,
        worker: &WorkerDescriptor,
        servers: &[ToolServer],
        skills: &[SkillDefinition],
    ) -> Value {
        let mcp_servers: Vec<Value> = servers
            .iter()
            .map(|server| {
                let name = if server.name.is_empty() {
                    &server.id
                } else {
                    &server.name
                };
                json!({
                    "id": server.id,
                    "name": name,
                    "url": format!("{}/mcp/{}", self.public_url, server.id),
                })
            })
            .collect();

        json!({
            "agent_id": worker.id,
            "name": worker.name,
            "provider": worker.provider,
            "model": worker.model,
            "system_prompt": worker.system_prompt,
            "features": worker.features,
            "mcp_servers": mcp_servers,
            "skills": skills.iter().map(|s| s.id.as_str()).collect::<Vec<_>>(),
            "peers_url": format!("{}/api/agents", self.public_url),
        })
    }

    fn request(
        &self,
        method: reqwest::Method,
        port: u16,
        path: &str,
        token: &str,
    ) -> reqwest::RequestBuilder {
        self.client
            .request(method, Self::worker_url(port, path))
            .bearer_auth(token)
            .timeout(self.request_timeout)
    }

    /// `POST /config`
    pub async fn push_config(
        &self,
        port: u16,
        token: &str,
        document: &Value,
    ) -> anyhow::Result<()> {
        let response = self
            .request(reqwest::Method::POST, port, "/config", token)
            .json(document)
            .send()
            .await?;
        response.error_for_status()?;
        Ok(())
    }

    /// `PUT /skills/{name}`, falling back to `POST /skills` for workers that
    /// do not know the skill yet
    pub async fn push_skill(
        &self,
        port: u16,
        token: &str,
        skill: &SkillDefinition,
    ) -> anyhow::Result<()> {
        let body = json!({
            "name": skill.name,
            "description": skill.description,
            "content": skill.content,
        });

        let path = format!("/skills/{}", urlencoding::encode(&skill.name));
        let response = self
            .request(reqwest::Method::PUT, port, &path, token)
            .json(&body)
            .send()
            .await?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            debug!(skill = %skill.name, "skill unknown to worker, creating");
            self.request(reqwest::Method::POST, port, "/skills", token)
                .json(&body)
                .send()
                .await?
                .error_for_status()?;
            return Ok(());
        }

        response.error_for_status()?;
        Ok(())
    }

    /// `POST /skills/status`
    pub async fn set_skills_enabled(
        &self,
        port: u16,
        token: &str,
        enabled: bool,
    ) -> anyhow::Result<()> {
        self.request(reqwest::Method::POST, port, "/skills/status", token)
            .json(&json!({ "enabled": enabled }))
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }

    /// Push config, skills and the skills toggle; never fails as a whole
    pub async fn sync(
        &self,
        port: u16,
        token: &str,
        worker: &WorkerDescriptor,
        servers: &[ToolServer],
        skills: &[SkillDefinition],
    ) -> SyncReport {
        let mut report = SyncReport::default();

        let document = self.build_document(worker, servers, skills);
        match self.push_config(port, token, &document).await {
            Ok(()) => report.config_pushed = true,
            Err(e) => {
                warn!(worker_id = %worker.id, error = %e, "config push failed");
                report.failures.push(format!("config: {e}"));
            }
        }

        for skill in skills {
            match self.push_skill(port, token, skill).await {
                Ok(()) => report.skills_pushed.push(skill.id.clone()),
                Err(e) => {
                    warn!(
                        worker_id = %worker.id,
                        skill = %skill.id,
                        error = %e,
                        "skill push failed"
                    );
                    report.failures.push(format!("skill {}: {e}", skill.id));
                }
            }
        }

        if let Err(e) = self.set_skills_enabled(port, token, !skills.is_empty()).await {
            warn!(worker_id = %worker.id, error = %e, "skill toggle failed");
            report.failures.push(format!("skills status: {e}"));
        }

        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn worker() -> WorkerDescriptor {
        let mut worker = WorkerDescriptor::new("alpha", "openai", "gpt-4o");
        worker.name = "Alpha".into();
        worker.system_prompt = Some("Be brief.".into());
        worker.features.insert("memory".into(), true);
        worker
    }

    fn skill() -> SkillDefinition {
        SkillDefinition {
            id: "sk1".into(),
            name: "summarize".into(),
            description: "Summaries".into(),
            content: "# Summarize".into(),
        }
    }

    fn server() -> ToolServer {
        ToolServer {
            id: "weather".into(),
            name: String::new(),
            description: None,
            env: Default::default(),
            port: None,
        }
    }

    #[test]
    fn document_is_flat_and_points_back_at_gateway() {
        let sync = ConfigSynchronizer::new("http://gw:4000/", Duration::from_secs(1));
        let doc = sync.build_document(&worker(), &[server()], &[skill()]);

        assert_eq!(
            doc,
            json!({
                "agent_id": "alpha",
                "name": "Alpha",
                "provider": "openai",
                "model": "gpt-4o",
                "system_prompt": "Be brief.",
                "features": { "memory": true },
                "mcp_servers": [
                    { "id": "weather", "name": "weather", "url": "http://gw:4000/mcp/weather" }
                ],
                "skills": ["sk1"],
                "peers_url": "http://gw:4000/api/agents"
            })
        );
    }

    #[tokio::test]
    async fn sync_pushes_everything_with_bearer_token() {
        let worker_srv = MockServer::start().await;
        let port = worker_srv.address().port();

        Mock::given(method("POST"))
            .and(path("/config"))
            .and(header("Authorization", "Bearer tok"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&worker_srv)
            .await;
        Mock::given(method("PUT"))
            .and(path("/skills/summarize"))
            .and(header("Authorization", "Bearer tok"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&worker_srv)
            .await;
        Mock::given(method("POST"))
            .and(path("/skills/status"))
            .and(body_json(json!({ "enabled": true })))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&worker_srv)
            .await;

        let sync = ConfigSynchronizer::new("http://gw:4000", Duration::from_secs(2));
        let report = sync.sync(port, "tok", &worker(), &[], &[skill()]).await;

        assert!(report.is_clean(), "{:?}", report.failures);
        assert!(report.config_pushed);
        assert_eq!(report.skills_pushed, vec!["sk1".to_string()]);
    }

    #[tokio::test]
    async fn unknown_skill_falls_back_to_create() {
        let worker_srv = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/skills/summarize"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&worker_srv)
            .await;
        Mock::given(method("POST"))
            .and(path("/skills"))
            .and(body_json(json!({
                "name": "summarize",
                "description": "Summaries",
                "content": "# Summarize"
            })))
            .respond_with(ResponseTemplate::new(201))
            .expect(1)
            .mount(&worker_srv)
            .await;

        let sync = ConfigSynchronizer::new("http://gw:4000", Duration::from_secs(2));
        sync.push_skill(worker_srv.address().port(), "tok", &skill())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn skill_name_is_a_single_path_segment() {
        let worker_srv = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/skills/daily%2Freport%3Fv%3D2"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&worker_srv)
            .await;

        let mut odd = skill();
        odd.name = "daily/report?v=2".into();

        let sync = ConfigSynchronizer::new("http://gw:4000", Duration::from_secs(2));
        sync.push_skill(worker_srv.address().port(), "tok", &odd)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn failures_are_collected_not_raised() {
        let worker_srv = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/config"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&worker_srv)
            .await;
        Mock::given(method("POST"))
            .and(path("/skills/status"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&worker_srv)
            .await;

        let sync = ConfigSynchronizer::new("http://gw:4000", Duration::from_secs(2));
        let report = sync
            .sync(worker_srv.address().port(), "tok", &worker(), &[], &[])
            .await;

        assert!(!report.config_pushed);
        assert_eq!(report.failures.len(), 1);
        assert!(report.failures[0].starts_with("config:"));
    }
}
