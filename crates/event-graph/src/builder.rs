use std::collections::{BTreeMap, HashMap, HashSet};
use std::time::Duration;

use serde_json::Value;
use tracing::debug;

use agentsim_core_types::{AppName, EventId, ToolCall};
use agentsim_registry::CapabilityRegistry;

use crate::errors::GraphError;
use crate::graph::EventGraph;
use crate::model::{AgentSlot, Event, EventKind, EventTarget, FailurePolicy};

/// Capture-mode recorder: capability calls made through [`Capture`] are reified
/// into events instead of being executed.
#[derive(Debug, Default)]
pub struct GraphBuilder {
    registries: BTreeMap<AppName, CapabilityRegistry>,
    events: Vec<Event>,
    index: HashMap<EventId, usize>,
}

impl GraphBuilder {
    pub fn new(registries: impl IntoIterator<Item = CapabilityRegistry>) -> Self {
        let registries = registries
            .into_iter()
            .filter_map(|registry| registry.app().cloned().map(|app| (app, registry)))
            .collect();
        Self {
            registries,
            events: Vec::new(),
            index: HashMap::new(),
        }
    }

    /// Converts fractional seconds into a delay, rejecting negative or non-finite input.
    pub fn delay_secs(secs: f64) -> Result<Duration, GraphError> {
        if !secs.is_finite() || secs < 0.0 {
            return Err(GraphError::InvalidDelay(secs));
        }
        Ok(Duration::from_secs_f64(secs))
    }

    /// Capability proxy for one app.
    pub fn on(&mut self, app: impl Into<AppName>) -> Capture<'_> {
        Capture {
            builder: self,
            app: app.into(),
        }
    }

    /// Agent turn with no expected app or reference action.
    pub fn agent_turn(&mut self) -> EventDraft<'_> {
        self.push(EventKind::AgentAction, EventTarget::Agent(AgentSlot::default()))
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn event(&self, id: &EventId) -> Option<&Event> {
        self.index.get(id).map(|idx| &self.events[*idx])
    }

    /// Adds `predecessor` as a dependency of `event`, rejecting edges that close a cycle.
    pub fn add_dependency(
        &mut self,
        event: &EventId,
        predecessor: &EventId,
    ) -> Result<(), GraphError> {
        let idx = self.lookup(event)?;
        let pred_idx = self.lookup(predecessor)?;
        if idx == pred_idx || self.depends_transitively(pred_idx, idx) {
            return Err(GraphError::Cycle {
                event: event.clone(),
                predecessor: predecessor.clone(),
            });
        }
        let deps = &mut self.events[idx].dependencies;
        if !deps.contains(predecessor) {
            deps.push(predecessor.clone());
        }
        Ok(())
    }

    pub fn finalize(self) -> Result<EventGraph, GraphError> {
        debug!(events = self.events.len(), "finalizing event graph");
        EventGraph::from_events(self.events)
    }

    fn push(&mut self, kind: EventKind, target: EventTarget) -> EventDraft<'_> {
        let index = self.events.len();
        let id = EventId::sequential(index + 1);
        self.index.insert(id.clone(), index);
        self.events.push(Event {
            id,
            kind,
            target,
            dependencies: Vec::new(),
            delay: Duration::ZERO,
            label: None,
            failure_policy: None,
        });
        EventDraft {
            builder: self,
            index,
        }
    }

    fn lookup(&self, id: &EventId) -> Result<usize, GraphError> {
        self.index
            .get(id)
            .copied()
            .ok_or_else(|| GraphError::UnknownEvent(id.clone()))
    }

    /// True when `from` reaches `target` by following dependency edges.
    fn depends_transitively(&self, from: usize, target: usize) -> bool {
        let mut stack = vec![from];
        let mut visited = HashSet::new();
        while let Some(current) = stack.pop() {
            if current == target {
                return true;
            }
            if !visited.insert(current) {
                continue;
            }
            for dep in &self.events[current].dependencies {
                if let Some(idx) = self.index.get(dep) {
                    stack.push(*idx);
                }
            }
        }
        false
    }

    fn registry(&self, app: &AppName) -> Result<&CapabilityRegistry, GraphError> {
        self.registries
            .get(app)
            .ok_or_else(|| GraphError::UnknownApp(app.clone()))
    }
}

/// Proxy returned by [`GraphBuilder::on`].
pub struct Capture<'a> {
    builder: &'a mut GraphBuilder,
    app: AppName,
}

impl<'a> Capture<'a> {
    /// Records a user action; arguments are checked against the app's schema here,
    /// once, instead of at dispatch.
    pub fn call(self, capability: &str, args: Value) -> Result<EventDraft<'a>, GraphError> {
        let call = self.bound(capability, args)?;
        let Capture { builder, .. } = self;
        Ok(builder.push(EventKind::UserAction, EventTarget::Call(call)))
    }

    /// Records an agent slot on this app with an expected reference action.
    pub fn expect_agent(self, capability: &str, args: Value) -> Result<EventDraft<'a>, GraphError> {
        let hint = self.bound(capability, args)?;
        let Capture { builder, app } = self;
        let slot = AgentSlot {
            app: Some(app),
            hint: Some(hint),
        };
        Ok(builder.push(EventKind::AgentAction, EventTarget::Agent(slot)))
    }

    /// Records an agent slot on this app without a reference action.
    pub fn agent_turn(self) -> Result<EventDraft<'a>, GraphError> {
        let Capture { builder, app } = self;
        builder.registry(&app)?;
        let slot = AgentSlot {
            app: Some(app),
            hint: None,
        };
        Ok(builder.push(EventKind::AgentAction, EventTarget::Agent(slot)))
    }

    fn bound(&self, capability: &str, args: Value) -> Result<ToolCall, GraphError> {
        self.builder
            .registry(&self.app)?
            .validate_call(capability, &args)?;
        Ok(ToolCall::new(self.app.clone(), capability, args))
    }
}

/// Handle on a freshly captured event for chaining annotations.
pub struct EventDraft<'a> {
    builder: &'a mut GraphBuilder,
    index: usize,
}

impl<'a> EventDraft<'a> {
    pub fn id(&self) -> EventId {
        self.event().id.clone()
    }

    /// Marks the event as ground truth for validation.
    pub fn oracle(self) -> Self {
        let event = &mut self.builder.events[self.index];
        if matches!(event.target, EventTarget::Call(_)) {
            event.kind = EventKind::OracleAction;
        }
        self
    }

    pub fn label(self, label: impl Into<String>) -> Self {
        self.builder.events[self.index].label = Some(label.into());
        self
    }

    pub fn tolerate_failed_deps(self) -> Self {
        self.builder.events[self.index].failure_policy = Some(FailurePolicy::AttemptAnyway);
        self
    }

    pub fn failure_policy(self, policy: FailurePolicy) -> Self {
        self.builder.events[self.index].failure_policy = Some(policy);
        self
    }

    /// `None` declares a graph root; `delay` is measured from the latest
    /// predecessor completion, or from simulation start for roots.
    pub fn depends_on(
        self,
        predecessor: Option<&EventId>,
        delay: Duration,
    ) -> Result<Self, GraphError> {
        let id = self.id();
        match predecessor {
            None => {
                if !self.event().dependencies.is_empty() {
                    return Err(GraphError::InvalidRoot(id));
                }
            }
            Some(pred) => self.builder.add_dependency(&id, pred)?,
        }
        self.builder.events[self.index].delay = delay;
        Ok(self)
    }

    pub fn depends_on_all(self, predecessors: &[EventId], delay: Duration) -> Result<Self, GraphError> {
        let id = self.id();
        for pred in predecessors {
            self.builder.add_dependency(&id, pred)?;
        }
        self.builder.events[self.index].delay = delay;
        Ok(self)
    }

    fn event(&self) -> &Event {
        &self.builder.events[self.index]
    }
}
