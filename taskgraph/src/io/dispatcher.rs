//! Closed dispatch from action type to handler.
//!
//! [`HandlerRegistry`] has one slot per [`ActionType`] variant and selects
//! with an exhaustive `match`, so adding a type fails to compile until it has
//! a handler.

use std::time::Instant;

use anyhow::{Context, Result};
use tracing::{debug, instrument, warn};

use crate::core::budget::remaining_budget;
use crate::core::context::SharedContext;
use crate::core::params::Params;
use crate::io::handlers::{
    ActionHandler, CreateDirectoryHandler, CreateFileHandler, CreateVirtualEnvironmentHandler,
    CustomActionHandler, DispatchOutput, HandlerRequest, HostEnv, InstallDependenciesHandler,
    RunCommandHandler,
};
use crate::io::oracle::Oracle;
use crate::plan::{Action, ActionType};

pub struct HandlerRegistry {
    create_directory: Box<dyn ActionHandler>,
    create_file: Box<dyn ActionHandler>,
    create_virtual_environment: Box<dyn ActionHandler>,
    install_dependencies: Box<dyn ActionHandler>,
    run_command: Box<dyn ActionHandler>,
    custom_action: Box<dyn ActionHandler>,
}

impl HandlerRegistry {
    /// Built-in handlers. `oracle` backs `custom_action` guidance when present.
    pub fn builtin(env: &HostEnv, oracle: Option<Box<dyn Oracle>>) -> Self {
        Self {
            create_directory: Box::new(CreateDirectoryHandler::new(env.clone())),
            create_file: Box::new(CreateFileHandler::new(env.clone())),
            create_virtual_environment: Box::new(CreateVirtualEnvironmentHandler::new(env.clone())),
            install_dependencies: Box::new(InstallDependenciesHandler::new(env.clone())),
            run_command: Box::new(RunCommandHandler::new(env.clone())),
            custom_action: Box::new(CustomActionHandler::new(oracle)),
        }
    }

    /// Swap the handler for one type.
    pub fn with_handler(mut self, action_type: ActionType, handler: Box<dyn ActionHandler>) -> Self {
        *self.slot_mut(action_type) = handler;
        self
    }

    pub fn handler_for(&self, action_type: ActionType) -> &dyn ActionHandler {
        match action_type {
            ActionType::CreateDirectory => self.create_directory.as_ref(),
            ActionType::CreateFile => self.create_file.as_ref(),
            ActionType::CreateVirtualEnvironment => self.create_virtual_environment.as_ref(),
            ActionType::InstallDependencies => self.install_dependencies.as_ref(),
            ActionType::RunCommand => self.run_command.as_ref(),
            ActionType::CustomAction => self.custom_action.as_ref(),
        }
    }

    fn slot_mut(&mut self, action_type: ActionType) -> &mut Box<dyn ActionHandler> {
        match action_type {
            ActionType::CreateDirectory => &mut self.create_directory,
            ActionType::CreateFile => &mut self.create_file,
            ActionType::CreateVirtualEnvironment => &mut self.create_virtual_environment,
            ActionType::InstallDependencies => &mut self.install_dependencies,
            ActionType::RunCommand => &mut self.run_command,
            ActionType::CustomAction => &mut self.custom_action,
        }
    }
}

pub struct Dispatcher {
    registry: HandlerRegistry,
}

impl Dispatcher {
    pub fn new(registry: HandlerRegistry) -> Self {
        Self { registry }
    }

    /// Render params against `context` and run the matching handler.
    ///
    /// Any `Err` is a dispatch fault: the side effect may be partial.
    #[instrument(skip_all, fields(action_id = %action.id, action_type = %action.action_type))]
    pub fn dispatch(
        &self,
        action: &Action,
        context: &SharedContext,
        deadline: Instant,
    ) -> Result<DispatchOutput> {
        let timeout = remaining_budget(deadline)?;
        let params = Params::resolve(&action.params, context)
            .with_context(|| format!("resolve params for {}", action.id))?;
        let request = HandlerRequest {
            action_id: &action.id,
            description: &action.description,
            params: &params,
            context,
            timeout,
        };
        debug!(timeout_secs = timeout.as_secs(), "dispatching");
        let result = self
            .registry
            .handler_for(action.action_type)
            .handle(&request);
        if let Err(err) = &result {
            warn!(err = %format!("{err:#}"), "handler failed");
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::context::{ContextKey, Fact};
    use crate::test_support::{ScriptedHandler, action, host_env};
    use serde_json::json;
    use std::time::Duration;

    fn deadline() -> Instant {
        Instant::now() + Duration::from_secs(30)
    }

    #[test]
    fn routes_each_type_to_its_slot() {
        let temp = tempfile::tempdir().expect("tempdir");
        let mut registry = HandlerRegistry::builtin(&host_env(temp.path()), None);
        let mut logs = Vec::new();
        for ty in ActionType::ALL {
            let handler = ScriptedHandler::always(DispatchOutput::with_output(ty.as_str()));
            logs.push((ty, handler.calls()));
            registry = registry.with_handler(ty, Box::new(handler));
        }
        let dispatcher = Dispatcher::new(registry);

        for (ty, calls) in &logs {
            let mut a = action(ty.as_str(), &[]);
            a.action_type = *ty;
            let out = dispatcher
                .dispatch(&a, &SharedContext::default(), deadline())
                .expect("dispatch");
            assert_eq!(out.output.as_deref(), Some(ty.as_str()));
            assert_eq!(*calls.borrow(), vec![ty.as_str().to_string()]);
        }
    }

    #[test]
    fn params_are_templated_before_the_handler_runs() {
        let temp = tempfile::tempdir().expect("tempdir");
        let dispatcher = Dispatcher::new(HandlerRegistry::builtin(&host_env(temp.path()), None));
        let mut context = SharedContext::default();
        context.absorb(
            ActionType::CreateDirectory,
            &[Fact::new(ContextKey::LastCreatedDir, "app")],
        );
        let mut a = action("mk", &[]);
        a.action_type = ActionType::CreateDirectory;
        a.params = json!({"path": "{{ last_created_dir }}/src"})
            .as_object()
            .cloned()
            .expect("object");

        let out = dispatcher.dispatch(&a, &context, deadline()).expect("dispatch");
        assert!(temp.path().join("app/src").is_dir());
        assert_eq!(out.facts, vec![Fact::new(ContextKey::LastCreatedDir, "app/src")]);
    }

    #[test]
    fn expired_deadline_is_a_fault() {
        let temp = tempfile::tempdir().expect("tempdir");
        let dispatcher = Dispatcher::new(HandlerRegistry::builtin(&host_env(temp.path()), None));
        let err = dispatcher
            .dispatch(&action("a", &[]), &SharedContext::default(), Instant::now())
            .unwrap_err();
        assert_eq!(err.to_string(), "action timed out");
    }
}
