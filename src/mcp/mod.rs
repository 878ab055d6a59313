//! MCP server exposing molecule workflows to agents.

mod types;

use std::sync::Arc;

pub use types::*;

use rmcp::{
    handler::server::{tool::ToolRouter, wrapper::Parameters},
    model::{CallToolResult, Content, ServerInfo},
    tool, tool_handler, tool_router, ErrorData as McpError, ServerHandler, ServiceExt,
};
use serde::Serialize;

use crate::db::Database;
use crate::error::Error;
use crate::models::*;
use crate::molecule::MoleculeEngine;

#[derive(Clone)]
pub struct McpServer {
    engine: Arc<MoleculeEngine<Database>>,
    tool_router: ToolRouter<Self>,
}

fn workflow_error(e: Error) -> McpError {
    match e {
        Error::Transport(_) => McpError::internal_error(e.to_string(), None),
        _ => McpError::invalid_params(e.to_string(), None),
    }
}

fn store_error(e: anyhow::Error) -> McpError {
    McpError::internal_error(e.to_string(), None)
}

fn json_result<T: Serialize>(value: &T) -> Result<CallToolResult, McpError> {
    let json = serde_json::to_string_pretty(value)
        .map_err(|e| McpError::internal_error(e.to_string(), None))?;
    Ok(CallToolResult::success(vec![Content::text(json)]))
}

fn parse_mode(mode: Option<&str>) -> Result<CloseMode, McpError> {
    match mode {
        None => Ok(CloseMode::Plain),
        Some(m) => CloseMode::from_str(m).ok_or_else(|| {
            McpError::invalid_params(
                format!(
                    "Invalid mode '{}'. Must be: plain, continue, or no_auto",
                    m
                ),
                None,
            )
        }),
    }
}

impl McpServer {
    pub fn new(engine: Arc<MoleculeEngine<Database>>) -> Self {
        Self {
            engine,
            tool_router: Self::tool_router(),
        }
    }

    fn do_cook(&self, formula: &str) -> Result<Protomolecule, McpError> {
        self.engine.cook(formula).map_err(workflow_error)
    }

    fn do_pour(&self, req: &InstantiateRequest) -> Result<ProgressResponse, McpError> {
        let progress = match req.parent_id {
            Some(ref parent) => self.engine.bond(&req.proto_id, &req.vars, parent),
            None => self.engine.pour(&req.proto_id, &req.vars),
        }
        .map_err(workflow_error)?;
        Ok(ProgressResponse::from(&progress))
    }

    fn do_wisp(&self, req: &InstantiateRequest) -> Result<ProgressResponse, McpError> {
        let progress = self
            .engine
            .wisp(&req.proto_id, &req.vars)
            .map_err(workflow_error)?;
        Ok(ProgressResponse::from(&progress))
    }

    fn do_current(&self, agent: &str, instance_id: Option<&str>) -> Result<ProgressResponse, McpError> {
        let ctx = self
            .engine
            .store()
            .load_agent_context(agent)
            .map_err(store_error)?;
        let progress = self
            .engine
            .current(&ctx, instance_id)
            .map_err(workflow_error)?;
        Ok(ProgressResponse::from(&progress))
    }

    fn do_start(&self, step_id: &str) -> Result<StepInfo, McpError> {
        let step = self.engine.start(step_id).map_err(workflow_error)?;
        Ok(StepInfo::from(&step))
    }

    fn do_close(&self, step_id: &str, mode: Option<&str>) -> Result<CloseResponse, McpError> {
        let mode = parse_mode(mode)?;
        let outcome = self.engine.close(step_id, mode).map_err(workflow_error)?;
        Ok(CloseResponse::from(&outcome))
    }

    fn do_squash(&self, instance_id: &str, summary: &str) -> Result<Digest, McpError> {
        self.engine
            .squash(instance_id, summary)
            .map_err(workflow_error)
    }

    fn do_burn(&self, wisp_id: &str) -> Result<(), McpError> {
        self.engine.burn(wisp_id).map_err(workflow_error)
    }

    fn do_attach(&self, agent: &str, molecule_id: &str) -> Result<AttachmentResponse, McpError> {
        let store = self.engine.store();
        let mut ctx = store.load_agent_context(agent).map_err(store_error)?;
        self.engine
            .attach(&mut ctx, molecule_id)
            .map_err(workflow_error)?;
        store.save_agent_context(&ctx).map_err(store_error)?;
        Ok(AttachmentResponse {
            agent: ctx.agent,
            attached: ctx.attached,
        })
    }

    fn do_detach(&self, agent: &str) -> Result<Option<String>, McpError> {
        let store = self.engine.store();
        let mut ctx = store.load_agent_context(agent).map_err(store_error)?;
        let previous = self.engine.detach(&mut ctx);
        store.save_agent_context(&ctx).map_err(store_error)?;
        Ok(previous)
    }

    // ============================================================
    // Test helpers - expose tool logic for testing
    // ============================================================

    pub fn test_cook(&self, formula: &str) -> Result<Protomolecule, McpError> {
        self.do_cook(formula)
    }

    pub fn test_pour(
        &self,
        proto_id: &str,
        vars: Bindings,
        parent_id: Option<&str>,
    ) -> Result<ProgressResponse, McpError> {
        self.do_pour(&InstantiateRequest {
            proto_id: proto_id.to_string(),
            vars,
            parent_id: parent_id.map(str::to_string),
        })
    }

    pub fn test_wisp(&self, proto_id: &str, vars: Bindings) -> Result<ProgressResponse, McpError> {
        self.do_wisp(&InstantiateRequest {
            proto_id: proto_id.to_string(),
            vars,
            parent_id: None,
        })
    }

    pub fn test_current(
        &self,
        agent: &str,
        instance_id: Option<&str>,
    ) -> Result<ProgressResponse, McpError> {
        self.do_current(agent, instance_id)
    }

    pub fn test_start(&self, step_id: &str) -> Result<StepInfo, McpError> {
        self.do_start(step_id)
    }

    pub fn test_close(&self, step_id: &str, mode: Option<&str>) -> Result<CloseResponse, McpError> {
        self.do_close(step_id, mode)
    }

    pub fn test_squash(&self, instance_id: &str, summary: &str) -> Result<Digest, McpError> {
        self.do_squash(instance_id, summary)
    }

    pub fn test_burn(&self, wisp_id: &str) -> Result<(), McpError> {
        self.do_burn(wisp_id)
    }

    pub fn test_attach(&self, agent: &str, molecule_id: &str) -> Result<AttachmentResponse, McpError> {
        self.do_attach(agent, molecule_id)
    }

    pub fn test_detach(&self, agent: &str) -> Result<Option<String>, McpError> {
        self.do_detach(agent)
    }
}

#[tool_router]
impl McpServer {
    // ============================================================
    // Template Tools
    // ============================================================

    #[tool(
        description = "Compile a formula into a protomolecule. Resolves extends/expand composition into one linear step list with variable slots left open. Returns the protomolecule, including its id and the variables it needs."
    )]
    async fn mol_cook(&self, params: Parameters<CookRequest>) -> Result<CallToolResult, McpError> {
        json_result(&self.do_cook(&params.0.formula)?)
    }

    #[tool(
        description = "Pour a durable molecule from a protomolecule. Every variable slot must be bound (or have a default). Pass parent_id to bond the molecule onto an existing task. The first step starts 'ready'."
    )]
    async fn mol_pour(
        &self,
        params: Parameters<InstantiateRequest>,
    ) -> Result<CallToolResult, McpError> {
        json_result(&self.do_pour(&params.0)?)
    }

    #[tool(
        description = "Create an ephemeral wisp from a protomolecule. Wisps are never synced; use them for transient patrol or maintenance cycles. Finish with mol_squash or discard with mol_burn."
    )]
    async fn mol_wisp(
        &self,
        params: Parameters<InstantiateRequest>,
    ) -> Result<CallToolResult, McpError> {
        json_result(&self.do_wisp(&params.0)?)
    }

    // ============================================================
    // Agent Tools - walking a molecule
    // ============================================================

    #[tool(
        description = "Show where you are in a molecule: every step's status, closed/total counts, and the step to work on now. Without instance_id, uses the molecule attached to your context."
    )]
    async fn mol_current(
        &self,
        params: Parameters<CurrentRequest>,
    ) -> Result<CallToolResult, McpError> {
        let req = params.0;
        json_result(&self.do_current(&req.agent, req.instance_id.as_deref())?)
    }

    #[tool(
        description = "Claim a 'ready' step before working on it. Side effect: step status becomes 'in_progress'. Fails if another agent claimed it first."
    )]
    async fn mol_start(&self, params: Parameters<StepRequest>) -> Result<CallToolResult, McpError> {
        json_result(&self.do_start(&params.0.step_id)?)
    }

    #[tool(
        description = "Close a step when its work is done. mode 'continue' claims the next step for you in the same transaction; 'no_auto' leaves it ready for anyone. Closing an already closed step fails so you can tell you lost a race."
    )]
    async fn mol_close(&self, params: Parameters<CloseRequest>) -> Result<CallToolResult, McpError> {
        let req = params.0;
        json_result(&self.do_close(&req.step_id, req.mode.as_deref())?)
    }

    #[tool(
        description = "Collapse a molecule or wisp into an immutable digest with your summary. Allowed before every step is closed; the digest records the partial state. The instance accepts no further closes."
    )]
    async fn mol_squash(
        &self,
        params: Parameters<SquashRequest>,
    ) -> Result<CallToolResult, McpError> {
        let req = params.0;
        json_result(&self.do_squash(&req.instance_id, &req.summary)?)
    }

    #[tool(description = "Discard a wisp and its steps without a digest. Molecules cannot be burned.")]
    async fn mol_burn(&self, params: Parameters<BurnRequest>) -> Result<CallToolResult, McpError> {
        let req = params.0;
        self.do_burn(&req.wisp_id)?;
        Ok(CallToolResult::success(vec![Content::text(format!(
            "Burned {}",
            req.wisp_id
        ))]))
    }

    #[tool(
        description = "Pin a molecule to your context so mol_current without an id resolves to it. Other agents may pin the same molecule."
    )]
    async fn mol_attach(
        &self,
        params: Parameters<AttachRequest>,
    ) -> Result<CallToolResult, McpError> {
        let req = params.0;
        json_result(&self.do_attach(&req.agent, &req.molecule_id)?)
    }

    #[tool(description = "Unpin whatever molecule is attached to your context.")]
    async fn mol_detach(
        &self,
        params: Parameters<DetachRequest>,
    ) -> Result<CallToolResult, McpError> {
        let text = match self.do_detach(&params.0.agent)? {
            Some(id) => format!("Detached {}", id),
            None => "Nothing was attached".to_string(),
        };
        Ok(CallToolResult::success(vec![Content::text(text)]))
    }
}

#[tool_handler]
impl ServerHandler for McpServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            server_info: rmcp::model::Implementation {
                name: "gastown".into(),
                version: env!("CARGO_PKG_VERSION").into(),
                title: None,
                icons: None,
                website_url: None,
            },
            capabilities: rmcp::model::ServerCapabilities::builder()
                .enable_tools()
                .build(),
            instructions: Some(
                r#"Gas Town molecules are step-by-step workflows for agents.

TERMS:
- Formula: a workflow template. Protomolecule: a compiled formula.
- Molecule: a durable instance. Wisp: an ephemeral instance.
- Digest: the immutable summary left when an instance is squashed.

SETUP:
1. mol_cook a formula to get a protomolecule id
2. mol_pour (or mol_wisp) it with values for every variable
3. mol_attach the molecule to your agent context

WORKFLOW:
1. mol_current shows your steps and the one to work on now
2. mol_start claims a ready step
3. Do the work the step describes
4. mol_close with mode 'continue' to move straight to the next step
5. When everything is closed, mol_squash with a summary

Closing a step twice fails with "already closed". If that happens another
agent finished it first: call mol_current and carry on from there."#
                    .into(),
            ),
            ..Default::default()
        }
    }
}

pub async fn run_stdio_server(engine: Arc<MoleculeEngine<Database>>) -> anyhow::Result<()> {
    use tokio::io::{stdin, stdout};

    tracing::info!("Starting MCP server via stdio");

    let service = McpServer::new(engine);
    let server = service.serve((stdin(), stdout())).await?;

    let quit_reason = server.waiting().await?;
    tracing::info!("MCP server stopped: {:?}", quit_reason);

    Ok(())
}
