//! Plan Compiler contract
//!
//! Producing a plan from a directive is the job of an external reasoning
//! service. This module only fixes the seam ([`PlanCompiler`]) and enforces
//! the post-conditions every returned plan must meet before a command queue
//! may be built from it.

use async_trait::async_trait;
use indexmap::IndexMap;
use std::sync::{PoisonError, RwLock, RwLockReadGuard};

use crate::error::{CortexError, CortexResult};
use crate::primitives::PrimitiveRegistry;
use crate::types::{Directive, Plan};

#[async_trait]
pub trait PlanCompiler: Send + Sync {
    async fn compile(&self, directive: &Directive) -> CortexResult<Plan>;
}

/// Post-conditions of `compile`: every step names a registered capability and
/// only depends on strictly earlier steps.
pub fn validate_plan(plan: &Plan, registry: &PrimitiveRegistry) -> CortexResult<()> {
    for (index, step) in plan.steps.iter().enumerate() {
        if !registry.contains(&step.required_capability) {
            return Err(CortexError::UnknownCapability {
                capability: step.required_capability.clone(),
                step_index: index,
            });
        }
    }

    for (index, step) in plan.steps.iter().enumerate() {
        if let Some(bad) = step.depends_on.iter().find(|&&dep| dep >= index) {
            return Err(CortexError::CompilationError(format!(
                "step {} ('{}') depends on step {}, which is not an earlier step",
                index, step.description, bad
            )));
        }
    }

    Ok(())
}

/// Deterministic compiler backed by prepared plans.
///
/// A directive is matched first by an exact content route, then by the first
/// keyword route contained in its content, then by its type. Unmatched
/// directives fail with `CompilationError`.
#[derive(Debug, Default)]
pub struct StaticPlanCompiler {
    by_content: RwLock<IndexMap<String, Plan>>,
    by_keyword: RwLock<IndexMap<String, Plan>>,
    by_type: RwLock<IndexMap<String, Plan>>,
}

impl StaticPlanCompiler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_content_plan(self, content: impl Into<String>, plan: Plan) -> Self {
        self.route_content(content, plan);
        self
    }

    pub fn with_keyword_plan(self, keyword: impl Into<String>, plan: Plan) -> Self {
        self.route_keyword(keyword, plan);
        self
    }

    pub fn with_type_plan(self, directive_type: impl Into<String>, plan: Plan) -> Self {
        self.route_type(directive_type, plan);
        self
    }

    pub fn route_content(&self, content: impl Into<String>, plan: Plan) {
        insert(&self.by_content, content.into(), plan);
    }

    pub fn route_keyword(&self, keyword: impl Into<String>, plan: Plan) {
        insert(&self.by_keyword, keyword.into().to_lowercase(), plan);
    }

    pub fn route_type(&self, directive_type: impl Into<String>, plan: Plan) {
        insert(&self.by_type, directive_type.into(), plan);
    }

    fn resolve(&self, directive: &Directive) -> Option<Plan> {
        if let Some(plan) = read(&self.by_content).get(&directive.content) {
            return Some(plan.clone());
        }
        let content = directive.content.to_lowercase();
        if let Some((_, plan)) = read(&self.by_keyword)
            .iter()
            .find(|(keyword, _)| content.contains(keyword.as_str()))
        {
            return Some(plan.clone());
        }
        read(&self.by_type).get(&directive.directive_type).cloned()
    }
}

fn insert(routes: &RwLock<IndexMap<String, Plan>>, key: String, plan: Plan) {
    routes
        .write()
        .unwrap_or_else(PoisonError::into_inner)
        .insert(key, plan);
}

fn read(routes: &RwLock<IndexMap<String, Plan>>) -> RwLockReadGuard<'_, IndexMap<String, Plan>> {
    routes.read().unwrap_or_else(PoisonError::into_inner)
}

#[async_trait]
impl PlanCompiler for StaticPlanCompiler {
    async fn compile(&self, directive: &Directive) -> CortexResult<Plan> {
        self.resolve(directive).ok_or_else(|| {
            CortexError::CompilationError(format!(
                "no plan known for {} directive '{}'",
                directive.directive_type, directive.content
            ))
        })
    }
}
