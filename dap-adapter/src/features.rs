// Pluggable feature components and install collaborators
//
// Features are installed during session startup, strictly in registration
// order. They declare the protocol domains they need (enabled before any
// feature installs) and may contribute handlers to the dispatch table.

use crate::dispatch::CommandHandler;
use crate::error::{AdapterError, AdapterResult};
use async_trait::async_trait;
use inspector_client::InspectorConnection;
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info};

/// A pluggable unit of adapter functionality
#[async_trait]
pub trait Feature: Send + Sync {
    fn name(&self) -> &str;

    /// Protocol domains this feature issues commands against
    fn domains(&self) -> Vec<String> {
        Vec::new()
    }

    /// Request handlers this feature contributes to the connected state
    fn command_handlers(&self) -> Vec<(String, Arc<dyn CommandHandler>)> {
        Vec::new()
    }

    async fn install(&self) -> AdapterResult<()>;
}

/// Brings up every protocol domain any feature registered interest in
#[async_trait]
pub trait DomainEnabler: Send + Sync {
    async fn enable_domains(&self) -> AdapterResult<()>;
}

/// Resumes a target launched in wait-for-debugger mode
#[async_trait]
pub trait RuntimeStarter: Send + Sync {
    async fn run_if_waiting_for_debugger(&self) -> AdapterResult<()>;
}

/// Protocol-specific teardown run by the terminating state
#[async_trait]
pub trait TeardownSteps: Send + Sync {
    async fn teardown(&self) -> AdapterResult<()>;
}

/// Domain enabler backed by the inspector connection. Enables each domain
/// once, in first-registration order.
pub struct InspectorDomainEnabler {
    connection: InspectorConnection,
    domains: Vec<String>,
}

impl InspectorDomainEnabler {
    pub fn new(connection: InspectorConnection, features: &[Arc<dyn Feature>]) -> Self {
        let mut domains: Vec<String> = Vec::new();
        for feature in features {
            for domain in feature.domains() {
                if !domains.contains(&domain) {
                    domains.push(domain);
                }
            }
        }

        Self {
            connection,
            domains,
        }
    }
}

#[async_trait]
impl DomainEnabler for InspectorDomainEnabler {
    async fn enable_domains(&self) -> AdapterResult<()> {
        for domain in &self.domains {
            debug!("Enabling domain {}", domain);
            self.connection.enable_domain(domain).await?;
        }
        Ok(())
    }
}

pub struct InspectorRuntimeStarter {
    connection: InspectorConnection,
    wait_for_debugger: bool,
}

impl InspectorRuntimeStarter {
    pub fn new(connection: InspectorConnection, wait_for_debugger: bool) -> Self {
        Self {
            connection,
            wait_for_debugger,
        }
    }
}

#[async_trait]
impl RuntimeStarter for InspectorRuntimeStarter {
    async fn run_if_waiting_for_debugger(&self) -> AdapterResult<()> {
        if !self.wait_for_debugger {
            return Ok(());
        }
        info!("Resuming target paused at startup");
        self.connection.run_if_waiting_for_debugger().await?;
        Ok(())
    }
}

/// Breakpoint management: needs the Debugger domain and contributes the
/// setBreakpoints handler.
pub struct BreakpointsFeature {
    connection: InspectorConnection,
}

impl BreakpointsFeature {
    pub fn new(connection: InspectorConnection) -> Self {
        Self { connection }
    }
}

#[async_trait]
impl Feature for BreakpointsFeature {
    fn name(&self) -> &str {
        "breakpoints"
    }

    fn domains(&self) -> Vec<String> {
        vec!["Debugger".to_string()]
    }

    fn command_handlers(&self) -> Vec<(String, Arc<dyn CommandHandler>)> {
        vec![(
            "setBreakpoints".to_string(),
            Arc::new(SetBreakpointsHandler {
                connection: self.connection.clone(),
                installed: Mutex::new(Vec::new()),
            }) as Arc<dyn CommandHandler>,
        )]
    }

    async fn install(&self) -> AdapterResult<()> {
        // Domain enabling already happened; nothing else to bring up
        debug!("Breakpoints feature installed");
        Ok(())
    }
}

struct SetBreakpointsHandler {
    connection: InspectorConnection,
    /// Breakpoint ids installed for the current source, replaced wholesale
    /// on every request as DAP semantics demand
    installed: Mutex<Vec<String>>,
}

#[async_trait]
impl CommandHandler for SetBreakpointsHandler {
    async fn handle(&self, arguments: Value) -> AdapterResult<Value> {
        let url = arguments["source"]["path"]
            .as_str()
            .ok_or_else(|| AdapterError::InvalidArguments("missing source.path".to_string()))?
            .to_string();

        let lines: Vec<i64> = arguments["breakpoints"]
            .as_array()
            .map(|bps| bps.iter().filter_map(|bp| bp["line"].as_i64()).collect())
            .unwrap_or_default();

        let mut installed = self.installed.lock().await;
        for id in installed.drain(..) {
            self.connection
                .send_command("Debugger.removeBreakpoint", json!({"breakpointId": id}))
                .await?;
        }

        let mut verified = Vec::with_capacity(lines.len());
        for line in lines {
            let result = self
                .connection
                .send_command(
                    "Debugger.setBreakpointByUrl",
                    json!({"url": url, "lineNumber": line - 1}),
                )
                .await?;

            if let Some(id) = result["breakpointId"].as_str() {
                installed.push(id.to_string());
            }
            verified.push(json!({"verified": true, "line": line}));
        }

        Ok(json!({"breakpoints": verified}))
    }
}
