//! Agent assembly: compose skills, code execution, and MCP server
//! selections into a running agent.

use std::sync::{Arc, Weak, atomic::AtomicBool};

use {anyhow::Result, tracing::{info, warn}};

use {
    agentry_agents::{
        AgentHandle, AgentSpec, CodeModeBuilder, ServerSelection, Toolset,
    },
    agentry_sandbox::Sandbox,
    agentry_skills::{InMemoryRegistry, generate_skills_prompt_section},
    agentry_tools::{CodeModeConfig, CodeModeToolset, SkillsToolset},
};

use crate::state::{AgentEntry, AppState};

/// Build and register the toolsets for an agent and materialize it.
///
/// Skills and code execution share one managed sandbox proxy, so state
/// persists between `execute_code` and `run_skill` and reconfigurations
/// of the sandbox manager take effect without rebuilding the agent.
pub async fn build_agent(
    state: &Arc<AppState>,
    spec: AgentSpec,
    code_execution: bool,
) -> Result<Arc<AgentEntry>> {
    let model = spec
        .model
        .clone()
        .unwrap_or_else(|| state.default_model.clone());
    let binding = state.bindings.bind(&model)?;

    let shared_sandbox: Arc<dyn Sandbox> = Arc::new(state.sandbox.managed());

    // Skills toolset, backed by the shared sandbox.
    let skills = if spec.skills.is_empty() {
        None
    } else {
        let registry = InMemoryRegistry::from_root(&state.paths.skills, &spec.skills);
        let found: Vec<String> = registry.metadata().iter().map(|s| s.name.clone()).collect();
        for requested in &spec.skills {
            if !found.contains(requested) {
                warn!(agent = %spec.id, skill = %requested, "requested skill not found");
            }
        }
        Some(Arc::new(SkillsToolset::new(
            Arc::new(registry),
            Arc::clone(&shared_sandbox),
        )))
    };

    // Code-execution toolset over the current selection.
    let code_mode = if code_execution {
        build_code_mode_toolset(state, spec.mcp_servers.clone(), skills.clone()).await?
    } else {
        None
    };

    // Augmented system prompt: base prompt plus the skills catalog.
    let base_prompt = spec
        .system_prompt
        .clone()
        .unwrap_or_else(|| "You are a helpful assistant.".to_string());
    let system_prompt = match &skills {
        Some(skills_toolset) => {
            let section = generate_skills_prompt_section(&skills_toolset.skills());
            if section.is_empty() {
                base_prompt
            } else {
                format!("{base_prompt}\n\n{section}")
            }
        },
        None => base_prompt,
    };
    state
        .tracker
        .set_system_prompt_tokens(&spec.id, &system_prompt);

    // Aux toolsets: skills first, code execution last.
    let mut aux: Vec<Arc<dyn Toolset>> = Vec::new();
    if let Some(ref skills_toolset) = skills {
        aux.push(Arc::new(Arc::clone(skills_toolset)) as Arc<dyn Toolset>);
    }
    let code_mode_index = code_mode.as_ref().map(|_| aux.len());
    if let Some(toolset) = code_mode {
        aux.push(toolset);
    }

    // Rebuild closure for retooling: a fresh managed proxy is obtained on
    // every rebuild so sandbox reconfigurations take effect.
    let builder: CodeModeBuilder = {
        let weak_state: Weak<AppState> = Arc::downgrade(state);
        let skills = skills.clone();
        Arc::new(move |selection: Vec<ServerSelection>| {
            let weak_state = weak_state.clone();
            let skills = skills.clone();
            Box::pin(async move {
                let Some(state) = weak_state.upgrade() else {
                    anyhow::bail!("gateway state dropped");
                };
                build_code_mode_toolset(&state, selection, skills).await
            })
        })
    };

    let agent_id = spec.id.clone();
    state.tracker.register_agent(&agent_id, Some(&model));

    let handle = AgentHandle::new(spec, binding, Arc::clone(&state.lifecycle))
        .with_system_prompt(system_prompt)
        .with_binding_factory(Arc::clone(&state.bindings))
        .with_aux_toolsets(aux, code_mode_index)
        .with_code_mode_builder(builder);

    info!(
        agent = %agent_id,
        model = %model,
        code_execution,
        skills = skills.is_some(),
        "agent assembled"
    );

    Ok(Arc::new(AgentEntry {
        handle: Arc::new(handle),
        skills,
        code_execution: AtomicBool::new(code_execution),
    }))
}

/// Build the code-execution toolset for a server selection. Registers the
/// currently-running selected servers into the toolset's own registry,
/// wires skills routing, and starts it. Empty selections build nothing.
pub async fn build_code_mode_toolset(
    state: &Arc<AppState>,
    selection: Vec<ServerSelection>,
    skills: Option<Arc<SkillsToolset>>,
) -> Result<Option<Arc<dyn Toolset>>> {
    if selection.is_empty() {
        return Ok(None);
    }

    // Fresh proxy per build so a reconfigured manager is picked up.
    let sandbox: Arc<dyn Sandbox> = Arc::new(state.sandbox.managed());

    let config = CodeModeConfig {
        workspace_path: state.paths.workspace.clone(),
        generated_path: state.paths.generated.clone(),
        skills_path: state.paths.skills.clone(),
        tool_proxy_url: state.sandbox.tool_proxy_url(),
        allow_direct_tool_calls: false,
    };

    let mut toolset = CodeModeToolset::new(config, sandbox, true);
    for selected in &selection {
        let origin = selected.origin.into();
        match state
            .lifecycle
            .get_running_server(&selected.id, Some(origin))
            .await
        {
            Some(instance) if instance.is_running() => {
                let bridges = instance.tool_bridges();
                info!(
                    server = %selected.id,
                    tools = bridges.len(),
                    "registered MCP server into code-execution registry"
                );
                toolset.register_tools(
                    bridges
                        .into_iter()
                        .map(|b| Arc::new(b) as Arc<dyn agentry_agents::AgentTool>),
                );
            },
            _ => warn!(server = %selected.id, "selected MCP server not running, not registered"),
        }
    }

    let toolset = Arc::new(toolset);
    toolset.start().await?;

    // Skill calls made from generated code (`skill__*`) route to the
    // skills toolset, both in-process and through the HTTP proxy.
    if let Some(skills) = skills {
        let caller_skills = Arc::clone(&skills);
        let caller: agentry_sandbox::ToolCaller = Arc::new(move |name, args| {
            let skills = Arc::clone(&caller_skills);
            Box::pin(async move { skills.call(&name, args).await })
        });
        toolset.set_skill_caller(Arc::clone(&caller));
        state.set_skills_proxy_caller(caller);
    }

    Ok(Some(Arc::new(toolset) as Arc<dyn Toolset>))
}
