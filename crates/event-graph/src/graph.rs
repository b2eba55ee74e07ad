use std::collections::{HashMap, VecDeque};

use serde::{Deserialize, Serialize};

use agentsim_core_types::EventId;

use crate::errors::GraphError;
use crate::model::{Event, EventKind, EventTarget};

/// Finalized, read-only dependency graph. Run state lives with the scheduler,
/// so one graph can be executed any number of times.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(try_from = "Vec<Event>", into = "Vec<Event>")]
pub struct EventGraph {
    events: Vec<Event>,
    index: HashMap<EventId, usize>,
    successors: Vec<Vec<usize>>,
    predecessors: Vec<Vec<usize>>,
    topo: Vec<usize>,
}

impl EventGraph {
    pub fn from_events(events: Vec<Event>) -> Result<Self, GraphError> {
        let mut index = HashMap::with_capacity(events.len());
        for (idx, event) in events.iter().enumerate() {
            index.insert(event.id.clone(), idx);
        }

        let mut successors = vec![Vec::new(); events.len()];
        let mut predecessors = vec![Vec::new(); events.len()];
        for (idx, event) in events.iter().enumerate() {
            if let EventTarget::Agent(slot) = &event.target {
                if let (Some(app), Some(hint)) = (&slot.app, &slot.hint) {
                    if &hint.app != app {
                        return Err(GraphError::HintMismatch(event.id.clone()));
                    }
                }
            }
            for dep in &event.dependencies {
                let pred = *index
                    .get(dep)
                    .ok_or_else(|| GraphError::UnknownEvent(dep.clone()))?;
                if pred == idx {
                    return Err(GraphError::Cycle {
                        event: event.id.clone(),
                        predecessor: dep.clone(),
                    });
                }
                predecessors[idx].push(pred);
                successors[pred].push(idx);
            }
        }

        let topo = topological_order(&events, &predecessors, &successors)?;
        Ok(Self {
            events,
            index,
            successors,
            predecessors,
            topo,
        })
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn get(&self, id: &EventId) -> Option<&Event> {
        self.index.get(id).map(|idx| &self.events[*idx])
    }

    /// Events by dense index, in capture order.
    pub fn event_at(&self, idx: usize) -> &Event {
        &self.events[idx]
    }

    pub fn events(&self) -> &[Event] {
        &self.events
    }

    pub fn successors_of(&self, idx: usize) -> &[usize] {
        &self.successors[idx]
    }

    pub fn predecessors_of(&self, idx: usize) -> &[usize] {
        &self.predecessors[idx]
    }

    pub fn roots(&self) -> impl Iterator<Item = usize> + '_ {
        (0..self.events.len()).filter(|idx| self.predecessors[*idx].is_empty())
    }

    pub fn topological_order(&self) -> impl Iterator<Item = &Event> + '_ {
        self.topo.iter().map(|idx| &self.events[*idx])
    }

    pub fn oracle_events(&self) -> impl Iterator<Item = &Event> + '_ {
        self.events
            .iter()
            .filter(|event| event.kind == EventKind::OracleAction)
    }

    pub fn count_kind(&self, kind: EventKind) -> usize {
        self.events.iter().filter(|event| event.kind == kind).count()
    }
}

fn topological_order(
    events: &[Event],
    predecessors: &[Vec<usize>],
    successors: &[Vec<usize>],
) -> Result<Vec<usize>, GraphError> {
    let mut indegree: Vec<usize> = predecessors.iter().map(Vec::len).collect();
    let mut queue: VecDeque<usize> = (0..events.len()).filter(|idx| indegree[*idx] == 0).collect();
    let mut order = Vec::with_capacity(events.len());
    while let Some(idx) = queue.pop_front() {
        order.push(idx);
        for succ in &successors[idx] {
            indegree[*succ] -= 1;
            if indegree[*succ] == 0 {
                queue.push_back(*succ);
            }
        }
    }
    if order.len() == events.len() {
        return Ok(order);
    }
    // any event left with a nonzero indegree sits on (or behind) a cycle
    let stuck = (0..events.len())
        .find(|idx| indegree[*idx] > 0)
        .unwrap_or_default();
    let pred = predecessors[stuck]
        .iter()
        .copied()
        .find(|pred| indegree[*pred] > 0)
        .unwrap_or(stuck);
    Err(GraphError::Cycle {
        event: events[stuck].id.clone(),
        predecessor: events[pred].id.clone(),
    })
}

impl TryFrom<Vec<Event>> for EventGraph {
    type Error = GraphError;

    fn try_from(events: Vec<Event>) -> Result<Self, Self::Error> {
        Self::from_events(events)
    }
}

impl From<EventGraph> for Vec<Event> {
    fn from(graph: EventGraph) -> Self {
        graph.events
    }
}
