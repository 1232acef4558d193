//! Railway deployments over the GraphQL API.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use shipwright_core::{
    CoreError, CoreResult, Deployer, DeploymentHandle, DeploymentState, DeploymentStatus,
};
use tracing::{debug, warn};

use crate::error::{ClientError, ClientResult};
use crate::settings::RailwaySettings;

const LATEST_DEPLOYMENT_QUERY: &str = r#"
query GetDeployments($projectId: String!) {
    project(id: $projectId) {
        deployments(first: 1) {
            edges {
                node {
                    id
                    status
                    createdAt
                }
            }
        }
    }
}"#;

const DEPLOYMENT_QUERY: &str = r#"
query GetDeployment($id: String!) {
    deployment(id: $id) {
        id
        status
        createdAt
    }
}"#;

const DEPLOYMENT_LOGS_QUERY: &str = r#"
query GetDeploymentLogs($deploymentId: String!) {
    deploymentLogs(deploymentId: $deploymentId, limit: 1000) {
        message
        timestamp
    }
}"#;

const TRIGGER_MUTATION: &str = r#"
mutation DeploymentTrigger($projectId: String!) {
    deploymentTrigger(input: {projectId: $projectId}) {
        id
    }
}"#;

/// A deployment as reported by Railway.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RailwayDeployment {
    pub id: String,
    pub status: String,
    pub created_at: Option<String>,
}

/// Allowed drift between the local clock and Railway's.
const CLOCK_SKEW_SECS: i64 = 10;

impl RailwayDeployment {
    /// Created before `since`, i.e. not the deployment a trigger started.
    ///
    /// A missing or unparseable timestamp counts as current.
    pub fn predates(&self, since: DateTime<Utc>) -> bool {
        let Some(created) = self
            .created_at
            .as_deref()
            .and_then(|at| DateTime::parse_from_rfc3339(at).ok())
        else {
            return false;
        };
        created.with_timezone(&Utc) < since - ChronoDuration::seconds(CLOCK_SKEW_SECS)
    }
}

/// Map a Railway status onto the deployment lifecycle.
pub fn map_status(status: &str) -> DeploymentState {
    match status {
        "SUCCESS" => DeploymentState::Success,
        "FAILED" | "CRASHED" => DeploymentState::Failure,
        _ => DeploymentState::Pending,
    }
}

/// Deployment collaborator for one Railway project.
pub struct RailwayDeployer {
    api_url: String,
    project_id: String,
    api_key: String,
    client: reqwest::Client,
}

impl RailwayDeployer {
    pub fn new(settings: &RailwaySettings) -> ClientResult<Self> {
        let api_key = settings
            .api_key
            .expose()
            .ok_or_else(|| ClientError::MissingConfig(vec![crate::settings::RAILWAY_API_KEY.to_string()]))?
            .to_string();
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self {
            api_url: settings.api_url.clone(),
            project_id: settings.project_id.clone(),
            api_key,
            client,
        })
    }

    pub fn project_id(&self) -> &str {
        &self.project_id
    }

    async fn graphql(&self, query: &str, variables: Value) -> ClientResult<Value> {
        let response = self
            .client
            .post(&self.api_url)
            .bearer_auth(&self.api_key)
            .json(&GraphQlRequest { query, variables })
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ClientError::Api {
                service: "Railway",
                status: status.as_u16(),
                body,
            });
        }
        let body: Value = response
            .json()
            .await
            .map_err(|e| ClientError::InvalidResponse(format!("GraphQL response: {}", e)))?;
        graphql_data(body)
    }

    /// Most recent deployment of the project, if any.
    pub async fn latest_deployment(&self) -> ClientResult<Option<RailwayDeployment>> {
        let data = self
            .graphql(LATEST_DEPLOYMENT_QUERY, json!({ "projectId": self.project_id }))
            .await?;
        parse_latest_deployment(&data)
    }

    pub async fn deployment(&self, id: &str) -> ClientResult<Option<RailwayDeployment>> {
        let data = self.graphql(DEPLOYMENT_QUERY, json!({ "id": id })).await?;
        match data.get("deployment") {
            None | Some(Value::Null) => Ok(None),
            Some(node) => serde_json::from_value(node.clone())
                .map(Some)
                .map_err(|e| ClientError::InvalidResponse(format!("deployment: {}", e))),
        }
    }

    /// Log messages of a deployment; empty when logs are unavailable.
    pub async fn deployment_logs(&self, id: &str) -> Vec<String> {
        match self
            .graphql(DEPLOYMENT_LOGS_QUERY, json!({ "deploymentId": id }))
            .await
        {
            Ok(data) => parse_logs(&data),
            Err(err) => {
                warn!("Could not fetch logs for deployment {}: {}", id, err);
                Vec::new()
            }
        }
    }
}

#[async_trait]
impl Deployer for RailwayDeployer {
    async fn trigger(&self) -> CoreResult<DeploymentHandle> {
        let data = self
            .graphql(TRIGGER_MUTATION, json!({ "projectId": self.project_id }))
            .await
            .map_err(|e| CoreError::Deployment(e.to_string()))?;
        match data
            .pointer("/deploymentTrigger/id")
            .and_then(Value::as_str)
        {
            Some(id) => {
                debug!("Triggered deployment {}", id);
                Ok(DeploymentHandle::tracked(id))
            }
            None => Ok(DeploymentHandle::untracked()),
        }
    }

    async fn poll_status(&self, handle: &DeploymentHandle) -> CoreResult<DeploymentStatus> {
        let deployment = match &handle.id {
            Some(id) => self.deployment(id).await,
            None => self.latest_deployment().await,
        }
        .map_err(|e| CoreError::Deployment(e.to_string()))?;

        let Some(deployment) = deployment else {
            return Ok(DeploymentStatus::pending("NO_DEPLOYMENT"));
        };
        if handle.id.is_none() && deployment.predates(handle.triggered_at) {
            debug!("Latest deployment {} predates the trigger", deployment.id);
            return Ok(DeploymentStatus::pending("NO_NEW_DEPLOYMENT"));
        }

        let state = map_status(&deployment.status);
        let status = match state {
            DeploymentState::Pending => DeploymentStatus::pending(deployment.status),
            terminal => {
                let logs = self.deployment_logs(&deployment.id).await;
                DeploymentStatus::finished(terminal, deployment.status, logs)
            }
        };
        Ok(status.with_deployment_id(deployment.id))
    }
}

#[derive(Debug, Serialize)]
struct GraphQlRequest<'a> {
    query: &'a str,
    variables: Value,
}

/// The `data` member of a GraphQL response, or its errors.
pub fn graphql_data(body: Value) -> ClientResult<Value> {
    if let Some(errors) = body.get("errors").filter(|e| !e.is_null()) {
        let messages: Vec<String> = errors
            .as_array()
            .map(|errs| {
                errs.iter()
                    .map(|e| {
                        e.get("message")
                            .and_then(Value::as_str)
                            .unwrap_or("unknown error")
                            .to_string()
                    })
                    .collect()
            })
            .unwrap_or_else(|| vec![errors.to_string()]);
        return Err(ClientError::InvalidResponse(format!(
            "GraphQL errors: {}",
            messages.join("; ")
        )));
    }
    match body {
        Value::Object(mut map) => Ok(map.remove("data").unwrap_or(Value::Null)),
        _ => Err(ClientError::InvalidResponse("GraphQL response is not an object".to_string())),
    }
}

fn parse_latest_deployment(data: &Value) -> ClientResult<Option<RailwayDeployment>> {
    let node = data
        .pointer("/project/deployments/edges/0/node")
        .cloned();
    match node {
        None | Some(Value::Null) => Ok(None),
        Some(node) => serde_json::from_value(node)
            .map(Some)
            .map_err(|e| ClientError::InvalidResponse(format!("deployment: {}", e))),
    }
}

fn parse_logs(data: &Value) -> Vec<String> {
    data.get("deploymentLogs")
        .and_then(Value::as_array)
        .map(|logs| {
            logs.iter()
                .filter_map(|log| log.get("message").and_then(Value::as_str))
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}
