//! Edge conditions.
//!
//! A condition gates a non-bundle edge. Structure-scope conditions are judged
//! by the graph executor against its own graph; executable-scope conditions
//! are shipped in a `condition` mail to the branch that requested the step and
//! judged against that branch's context.

use std::{collections::HashMap, fmt, sync::Arc};

use regex::Regex;
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_json::Value;

use crate::{
    MailflowError, Result,
    graph::{Edge, Graph, NodeId},
    model::ConditionModel,
    runtime::Context,
};

/// Where a condition must be evaluated.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, Default, PartialEq, Eq, strum::AsRefStr, strum::EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ConditionScope {
    /// Evaluated synchronously against the owning graph.
    #[default]
    Structure,
    /// Evaluated by the executable actor running the branch.
    Executable,
}

/// What a condition is evaluated against.
#[derive(Clone, Copy)]
pub enum Subject<'a> {
    Graph(&'a Graph),
    Branch(&'a Context),
}

impl<'a> Subject<'a> {
    fn graph(
        self,
        kind: &str,
    ) -> Result<&'a Graph> {
        match self {
            Subject::Graph(graph) => Ok(graph),
            Subject::Branch(_) => Err(MailflowError::Structure(format!("condition '{}' needs the graph", kind))),
        }
    }

    fn context(
        self,
        kind: &str,
    ) -> Result<&'a Context> {
        match self {
            Subject::Branch(ctx) => Ok(ctx),
            Subject::Graph(_) => Err(MailflowError::Structure(format!("condition '{}' needs a branch context", kind))),
        }
    }
}

pub trait Condition: Send + Sync {
    /// Kind tag, as used in serialized graphs.
    fn kind(&self) -> &str;

    fn scope(&self) -> ConditionScope;

    /// Judges whether `edge` may be followed.
    ///
    /// Errors are wrapped with the edge's head and tail by the caller.
    fn evaluate(
        &self,
        edge: &Edge,
        subject: Subject<'_>,
    ) -> Result<bool>;
}

/// Conditions that can be rebuilt from a serialized descriptor.
pub trait ConditionParams: Condition + DeserializeOwned + Sized + 'static {
    const KIND: &'static str;

    /// JSON schema the params must satisfy.
    fn schema() -> Value;

    fn create(params: Value) -> Result<Self> {
        jsonschema::validate(&Self::schema(), &params)?;
        let condition = serde_json::from_value::<Self>(params)?;
        Ok(condition)
    }
}

/// Constant verdict.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Constant {
    pub value: bool,
}

impl Constant {
    pub fn always() -> Arc<dyn Condition> {
        Arc::new(Self {
            value: true,
        })
    }

    pub fn never() -> Arc<dyn Condition> {
        Arc::new(Self {
            value: false,
        })
    }
}

impl Condition for Constant {
    fn kind(&self) -> &str {
        Self::KIND
    }

    fn scope(&self) -> ConditionScope {
        ConditionScope::Structure
    }

    fn evaluate(
        &self,
        _edge: &Edge,
        _subject: Subject<'_>,
    ) -> Result<bool> {
        Ok(self.value)
    }
}

impl ConditionParams for Constant {
    const KIND: &'static str = "constant";

    fn schema() -> Value {
        serde_json::json!({
            "type": "object",
            "required": ["value"],
            "properties": {
                "value": { "type": "boolean" }
            }
        })
    }
}

/// True when the named node is part of the graph.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct NodeExists {
    pub node: NodeId,
}

impl Condition for NodeExists {
    fn kind(&self) -> &str {
        Self::KIND
    }

    fn scope(&self) -> ConditionScope {
        ConditionScope::Structure
    }

    fn evaluate(
        &self,
        _edge: &Edge,
        subject: Subject<'_>,
    ) -> Result<bool> {
        Ok(subject.graph(Self::KIND)?.node_exists(&self.node))
    }
}

impl ConditionParams for NodeExists {
    const KIND: &'static str = "node_exists";

    fn schema() -> Value {
        serde_json::json!({
            "type": "object",
            "required": ["node"],
            "properties": {
                "node": { "type": "string" }
            }
        })
    }
}

/// Looks `key` up in the branch's latest context object. Without `equals`
/// the key only has to be present and non-null.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ContextValue {
    pub key: String,
    #[serde(default)]
    pub equals: Option<Value>,
}

impl Condition for ContextValue {
    fn kind(&self) -> &str {
        Self::KIND
    }

    fn scope(&self) -> ConditionScope {
        ConditionScope::Executable
    }

    fn evaluate(
        &self,
        _edge: &Edge,
        subject: Subject<'_>,
    ) -> Result<bool> {
        let ctx = subject.context(Self::KIND)?;
        let actual = ctx.latest_context().and_then(|v| v.get(&self.key).cloned());
        Ok(match (&actual, &self.equals) {
            (None, _) | (Some(Value::Null), None) => false,
            (Some(_), None) => true,
            (Some(actual), Some(expected)) => actual == expected,
        })
    }
}

impl ConditionParams for ContextValue {
    const KIND: &'static str = "context_value";

    fn schema() -> Value {
        serde_json::json!({
            "type": "object",
            "required": ["key"],
            "properties": {
                "key": { "type": "string" },
                "equals": {}
            }
        })
    }
}

/// Regex over the most recent turn of the branch conversation, inherited
/// turns included.
#[derive(Debug, Clone)]
pub struct ResponseMatches {
    pattern: Regex,
}

impl ResponseMatches {
    pub fn new(pattern: &str) -> Result<Self> {
        let pattern = Regex::new(pattern).map_err(|e| MailflowError::Convert(format!("invalid pattern '{}': {}", pattern, e)))?;
        Ok(Self {
            pattern,
        })
    }
}

impl<'de> Deserialize<'de> for ResponseMatches {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        #[derive(Deserialize)]
        struct Params {
            pattern: String,
        }

        let params = Params::deserialize(deserializer)?;
        ResponseMatches::new(&params.pattern).map_err(serde::de::Error::custom)
    }
}

impl Condition for ResponseMatches {
    fn kind(&self) -> &str {
        Self::KIND
    }

    fn scope(&self) -> ConditionScope {
        ConditionScope::Executable
    }

    fn evaluate(
        &self,
        _edge: &Edge,
        subject: Subject<'_>,
    ) -> Result<bool> {
        let ctx = subject.context(Self::KIND)?;
        Ok(match ctx.last_response() {
            Some(Value::String(text)) => self.pattern.is_match(&text),
            Some(other) => self.pattern.is_match(&other.to_string()),
            None => false,
        })
    }
}

impl ConditionParams for ResponseMatches {
    const KIND: &'static str = "response_matches";

    fn schema() -> Value {
        serde_json::json!({
            "type": "object",
            "required": ["pattern"],
            "properties": {
                "pattern": { "type": "string" }
            }
        })
    }
}

type Predicate = dyn Fn(&Edge, Subject<'_>) -> Result<bool> + Send + Sync;

/// Closure-backed condition for predicates that never need to be stored.
pub struct FnCondition {
    kind: String,
    scope: ConditionScope,
    predicate: Box<Predicate>,
}

impl FnCondition {
    pub fn new<F>(
        kind: impl Into<String>,
        scope: ConditionScope,
        predicate: F,
    ) -> Arc<dyn Condition>
    where
        F: Fn(&Edge, Subject<'_>) -> Result<bool> + Send + Sync + 'static,
    {
        Arc::new(Self {
            kind: kind.into(),
            scope,
            predicate: Box::new(predicate),
        })
    }
}

impl Condition for FnCondition {
    fn kind(&self) -> &str {
        &self.kind
    }

    fn scope(&self) -> ConditionScope {
        self.scope
    }

    fn evaluate(
        &self,
        edge: &Edge,
        subject: Subject<'_>,
    ) -> Result<bool> {
        (self.predicate)(edge, subject)
    }
}

type Constructor = Arc<dyn Fn(Value) -> Result<Arc<dyn Condition>> + Send + Sync>;

/// Maps serialized condition kinds to constructors.
///
/// [`ConditionRegistry::default`] knows every built-in condition; custom
/// kinds are added with [`ConditionRegistry::register`] or
/// [`ConditionRegistry::register_fn`] before graphs are loaded.
#[derive(Clone)]
pub struct ConditionRegistry {
    constructors: HashMap<String, Constructor>,
}

impl Default for ConditionRegistry {
    fn default() -> Self {
        let mut registry = Self::empty();
        registry.register::<Constant>();
        registry.register::<NodeExists>();
        registry.register::<ContextValue>();
        registry.register::<ResponseMatches>();
        registry
    }
}

impl fmt::Debug for ConditionRegistry {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        let mut kinds: Vec<_> = self.constructors.keys().collect();
        kinds.sort();
        f.debug_struct("ConditionRegistry").field("kinds", &kinds).finish()
    }
}

impl ConditionRegistry {
    pub fn empty() -> Self {
        Self {
            constructors: HashMap::new(),
        }
    }

    pub fn register<C: ConditionParams>(&mut self) {
        self.register_fn(C::KIND, |params| Ok(Arc::new(C::create(params)?) as Arc<dyn Condition>));
    }

    pub fn register_fn<F>(
        &mut self,
        kind: &str,
        constructor: F,
    ) where
        F: Fn(Value) -> Result<Arc<dyn Condition>> + Send + Sync + 'static,
    {
        self.constructors.insert(kind.to_string(), Arc::new(constructor));
    }

    pub fn contains(
        &self,
        kind: &str,
    ) -> bool {
        self.constructors.contains_key(kind)
    }

    pub fn build(
        &self,
        model: &ConditionModel,
    ) -> Result<Arc<dyn Condition>> {
        let constructor = self.constructors.get(&model.kind).ok_or(MailflowError::Registry(format!("unknown condition kind '{}'", model.kind)))?;
        constructor(model.params.clone())
    }
}
