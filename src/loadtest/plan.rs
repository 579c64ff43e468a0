//! Test plan model with builder-style construction, validation and
//! TOML/JSON persistence.
//!
//! A [`TestPlan`] holds user-defined variables and an ordered list of
//! [`ThreadGroup`]s. Each group runs a [`Controller`] over an ordered list of
//! [`RequestStep`]s; each step is an HTTP [`Sampler`] followed by ordered
//! [`PostProcessor`]s.
//!
//! # Example TOML
//!
//! ```toml
//! name = "Test Plan"
//!
//! [variables]
//! site = "octoperf.com"
//!
//! [[thread_group]]
//! name = "First Thread Group"
//! threads = 2
//! ramp_up_secs = 1
//!
//! [thread_group.controller.kind]
//! type = "loop"
//! loops = 10
//! run_first = true
//!
//! [[thread_group.controller.step]]
//! [thread_group.controller.step.sampler]
//! name = "HTTP Request One"
//! method = "GET"
//! scheme = "https"
//! host = "${site}"
//! port = 443
//! path = "/blog/2023/02/22/jmeter-logging/"
//!
//! [[thread_group.controller.step.post_processor]]
//! type = "json_extractor"
//! variable = "foo"
//! json_path = "$.title"
//!
//! [[thread_group.controller.step.post_processor]]
//! type = "response_assertion"
//! field = "response_code"
//! rule = "equals"
//! patterns = ["200"]
//! ```

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

use crate::loadtest::error::LoadTestError;
use crate::loadtest::postprocess::JsonPath;
use crate::loadtest::scope::{has_placeholders, VariableScope};

/// HTTP methods a sampler may use.
const SUPPORTED_METHODS: &[&str] = &["GET", "POST", "PUT", "DELETE", "PATCH", "HEAD", "OPTIONS"];

/// Top-level test plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestPlan {
    /// Plan name, shown in the summary and report.
    pub name: String,
    /// Run thread groups one after another instead of concurrently.
    #[serde(default)]
    pub serialize_thread_groups: bool,
    /// User-defined variables seeded into every virtual user's scope.
    #[serde(default, deserialize_with = "deserialize_unique_variables")]
    pub variables: BTreeMap<String, String>,
    /// Thread groups in declaration order.
    ///
    /// The field name is `thread_group` in files because TOML `[[thread_group]]`
    /// array-of-tables syntax creates a key called `thread_group`.
    #[serde(rename = "thread_group")]
    pub thread_groups: Vec<ThreadGroup>,
}

/// A set of identical virtual users started over a ramp-up window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThreadGroup {
    pub name: String,
    /// Number of virtual users (at least 1).
    pub threads: u32,
    /// Window over which thread start times are spread evenly, in seconds.
    #[serde(default)]
    pub ramp_up_secs: u64,
    pub controller: Controller,
}

/// Iteration logic plus the ordered steps it drives.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Controller {
    pub kind: ControllerKind,
    #[serde(rename = "step")]
    pub steps: Vec<RequestStep>,
}

/// Controller variants. The `type` field in files selects the variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ControllerKind {
    /// Run the step sequence `loops` times.
    Loop {
        /// Number of iterations (at least 1 unless `infinite` is set).
        #[serde(default = "default_loops")]
        loops: u32,
        /// Loop until the run is stopped; `loops` is ignored.
        #[serde(default)]
        infinite: bool,
        /// Run the step sequence once more, unconditionally, before the
        /// counted iterations start.
        #[serde(default)]
        run_first: bool,
    },
}

fn default_loops() -> u32 {
    1
}

/// A sampler followed by its post-processors.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestStep {
    pub sampler: Sampler,
    #[serde(default, rename = "post_processor", skip_serializing_if = "Vec::is_empty")]
    pub post_processors: Vec<PostProcessor>,
}

/// One HTTP request definition. Host, path, header values and body may
/// contain `${name}` placeholders.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sampler {
    /// Label used for this step in results and reports.
    pub name: String,
    #[serde(default = "default_method")]
    pub method: String,
    #[serde(default = "default_scheme")]
    pub scheme: String,
    pub host: String,
    /// Explicit port; the scheme default applies when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    #[serde(default = "default_path")]
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, String>,
}

fn default_method() -> String {
    "GET".to_string()
}

fn default_scheme() -> String {
    "http".to_string()
}

fn default_path() -> String {
    "/".to_string()
}

/// Post-processors run against a received response, in declared order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PostProcessor {
    /// Bind the first value selected by `json_path` to `variable`.
    JsonExtractor {
        variable: String,
        json_path: String,
        /// Value bound when nothing matches; the variable is left unset otherwise.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        default: Option<String>,
    },
    /// Fail the sample unless `field` satisfies `rule` for every pattern.
    ResponseAssertion {
        #[serde(default)]
        field: AssertionField,
        #[serde(default)]
        rule: AssertionRule,
        patterns: Vec<String>,
        /// Invert the outcome of each pattern.
        #[serde(default)]
        negate: bool,
        /// Let this assertion alone decide success, ignoring the HTTP status.
        #[serde(default)]
        ignore_status: bool,
    },
}

/// Part of the response an assertion inspects.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssertionField {
    #[default]
    ResponseCode,
    ResponseBody,
    ResponseHeaders,
}

/// How an assertion pattern is compared with the inspected field.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssertionRule {
    /// Exact string equality.
    #[default]
    Equals,
    /// Plain substring search.
    Substring,
    /// Regex search anywhere in the value.
    Contains,
    /// Regex match of the whole value.
    Matches,
}

impl TestPlan {
    /// Start building a plan with the given name.
    pub fn builder(name: impl Into<String>) -> TestPlanBuilder {
        TestPlanBuilder {
            name: name.into(),
            serialize_thread_groups: false,
            variables: BTreeMap::new(),
            duplicate_variables: Vec::new(),
            thread_groups: Vec::new(),
        }
    }

    /// Parse a TOML string into a validated [`TestPlan`].
    pub fn from_toml(content: &str) -> Result<Self, LoadTestError> {
        let plan: Self = toml::from_str(content)?;
        plan.validate()?;
        Ok(plan)
    }

    /// Parse a JSON string into a validated [`TestPlan`].
    pub fn from_json(content: &str) -> Result<Self, LoadTestError> {
        let plan: Self = serde_json::from_str(content)?;
        plan.validate()?;
        Ok(plan)
    }

    /// Load and validate a plan from disk. Files ending in `.json` are read
    /// as JSON, everything else as TOML.
    pub fn load(path: &Path) -> Result<Self, LoadTestError> {
        let content = std::fs::read_to_string(path).map_err(|source| LoadTestError::ConfigIo {
            source,
            path: path.display().to_string(),
        })?;
        if is_json_path(path) {
            Self::from_json(&content)
        } else {
            Self::from_toml(&content)
        }
    }

    /// Render the plan as TOML.
    pub fn to_toml(&self) -> Result<String, LoadTestError> {
        toml::to_string_pretty(self).map_err(|e| LoadTestError::ConfigSerialize {
            message: e.to_string(),
        })
    }

    /// Render the plan as pretty-printed JSON.
    pub fn to_json(&self) -> Result<String, LoadTestError> {
        serde_json::to_string_pretty(self).map_err(|e| LoadTestError::ConfigSerialize {
            message: e.to_string(),
        })
    }

    /// Persist the plan definition, choosing the format by extension like [`TestPlan::load`].
    pub fn save(&self, path: &Path) -> Result<(), LoadTestError> {
        let content = if is_json_path(path) {
            self.to_json()?
        } else {
            self.to_toml()?
        };
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|source| LoadTestError::ConfigIo {
                source,
                path: parent.display().to_string(),
            })?;
        }
        std::fs::write(path, content).map_err(|source| LoadTestError::ConfigIo {
            source,
            path: path.display().to_string(),
        })
    }

    /// Total number of virtual users across all thread groups.
    pub fn total_threads(&self) -> u32 {
        self.thread_groups.iter().map(|g| g.threads).sum()
    }

    /// Validate that the plan is semantically correct.
    ///
    /// Checks:
    /// - At least one thread group is defined
    /// - Variable names are usable as `${name}` placeholders
    /// - Each group has `threads >= 1` and at least one step
    /// - Each loop has `loops >= 1` unless it is infinite
    /// - Each sampler has a supported method and a well-formed URL
    /// - Each post-processor is well-formed
    pub fn validate(&self) -> Result<(), LoadTestError> {
        if self.thread_groups.is_empty() {
            return Err(LoadTestError::validation(
                "Plan must contain at least one [[thread_group]]",
            ));
        }

        for name in self.variables.keys() {
            if !is_valid_variable_name(name) {
                return Err(LoadTestError::validation(format!(
                    "Variable name '{name}' must be non-empty and contain only letters, digits, '_', '.' or '-'"
                )));
            }
        }

        let plan_scope = VariableScope::seeded(&self.variables);
        for group in &self.thread_groups {
            group.validate(&plan_scope)?;
        }
        Ok(())
    }
}

/// Reads `variables`, rejecting a name that appears twice. TOML parsers
/// already refuse duplicate keys; JSON parsers keep the last one.
fn deserialize_unique_variables<'de, D>(deserializer: D) -> Result<BTreeMap<String, String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    use serde::de::{self, MapAccess, Visitor};
    use std::fmt;

    struct UniqueVariables;

    impl<'de> Visitor<'de> for UniqueVariables {
        type Value = BTreeMap<String, String>;

        fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
            formatter.write_str("a map of variable names to string values")
        }

        fn visit_map<M>(self, mut map: M) -> Result<Self::Value, M::Error>
        where
            M: MapAccess<'de>,
        {
            let mut variables = BTreeMap::new();
            while let Some((name, value)) = map.next_entry::<String, String>()? {
                if variables.contains_key(&name) {
                    return Err(de::Error::custom(format!(
                        "Variable '{name}' is defined more than once"
                    )));
                }
                variables.insert(name, value);
            }
            Ok(variables)
        }
    }

    deserializer.deserialize_map(UniqueVariables)
}

fn is_json_path(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("json"))
}

fn is_valid_variable_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'))
}

impl ThreadGroup {
    /// Start building a thread group with the given name.
    ///
    /// Defaults: 1 thread, no ramp-up, a single loop iteration.
    pub fn builder(name: impl Into<String>) -> ThreadGroupBuilder {
        ThreadGroupBuilder {
            name: name.into(),
            threads: 1,
            ramp_up_secs: 0,
            loops: 1,
            infinite: false,
            run_first: false,
            steps: Vec::new(),
        }
    }

    fn validate(&self, plan_scope: &VariableScope) -> Result<(), LoadTestError> {
        if self.threads < 1 {
            return Err(LoadTestError::validation(format!(
                "Thread group '{}' has threads=0; at least 1 thread is required",
                self.name
            )));
        }
        match self.controller.kind {
            ControllerKind::Loop {
                loops, infinite, ..
            } => {
                if loops < 1 && !infinite {
                    return Err(LoadTestError::validation(format!(
                        "Thread group '{}' has loops=0; set loops >= 1 or infinite = true",
                        self.name
                    )));
                }
            },
        }
        if self.controller.steps.is_empty() {
            return Err(LoadTestError::validation(format!(
                "Thread group '{}' must contain at least one step",
                self.name
            )));
        }
        for step in &self.controller.steps {
            step.validate(plan_scope)
                .map_err(|message| LoadTestError::validation(format!(
                    "Thread group '{}', step '{}': {message}",
                    self.name, step.sampler.name
                )))?;
        }
        Ok(())
    }
}

impl RequestStep {
    /// A step with no post-processors.
    pub fn new(sampler: Sampler) -> Self {
        Self {
            sampler,
            post_processors: Vec::new(),
        }
    }

    /// Append a post-processor.
    pub fn with(mut self, post_processor: PostProcessor) -> Self {
        self.post_processors.push(post_processor);
        self
    }

    /// Returns the step label.
    pub fn name(&self) -> &str {
        &self.sampler.name
    }

    /// Returns `true` if any assertion on this step overrides the HTTP status check.
    pub fn ignores_status(&self) -> bool {
        self.post_processors.iter().any(|p| {
            matches!(
                p,
                PostProcessor::ResponseAssertion {
                    ignore_status: true,
                    ..
                }
            )
        })
    }

    fn validate(&self, plan_scope: &VariableScope) -> Result<(), String> {
        self.sampler.validate(plan_scope)?;
        for post_processor in &self.post_processors {
            post_processor.validate()?;
        }
        Ok(())
    }
}

impl Sampler {
    /// Build a sampler from its parts. The path gets a leading `/` when missing.
    pub fn new(
        name: impl Into<String>,
        method: impl Into<String>,
        scheme: impl Into<String>,
        host: impl Into<String>,
        path: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            method: method.into(),
            scheme: scheme.into(),
            host: host.into(),
            port: None,
            path: normalize_path(&path.into()),
            body: None,
            headers: BTreeMap::new(),
        }
    }

    /// Build a sampler by splitting an absolute URL.
    pub fn from_url(
        name: impl Into<String>,
        method: impl Into<String>,
        raw_url: &str,
    ) -> Result<Self, LoadTestError> {
        let parsed = url::Url::parse(raw_url)
            .map_err(|e| LoadTestError::validation(format!("Invalid URL '{raw_url}': {e}")))?;
        let host = parsed
            .host_str()
            .ok_or_else(|| LoadTestError::validation(format!("URL '{raw_url}' has no host")))?;
        let mut path = parsed.path().to_owned();
        if let Some(query) = parsed.query() {
            path.push('?');
            path.push_str(query);
        }
        let mut sampler = Self::new(name, method, parsed.scheme(), host, path);
        sampler.port = parsed.port();
        Ok(sampler)
    }

    /// A GET sampler for an absolute URL.
    pub fn get(name: impl Into<String>, raw_url: &str) -> Result<Self, LoadTestError> {
        Self::from_url(name, "GET", raw_url)
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// Render the request URL with placeholders resolved against `scope`.
    pub fn url(&self, scope: &VariableScope) -> String {
        let host = scope.resolve(&self.host);
        let path = normalize_path(&scope.resolve(&self.path));
        match self.port {
            Some(port) => format!("{}://{}:{}{}", self.scheme.to_ascii_lowercase(), host, port, path),
            None => format!("{}://{}{}", self.scheme.to_ascii_lowercase(), host, path),
        }
    }

    fn validate(&self, plan_scope: &VariableScope) -> Result<(), String> {
        let method = self.method.to_ascii_uppercase();
        if !SUPPORTED_METHODS.contains(&method.as_str()) {
            return Err(format!(
                "unsupported method '{}' (expected one of {})",
                self.method,
                SUPPORTED_METHODS.join(", ")
            ));
        }
        let scheme = self.scheme.to_ascii_lowercase();
        if scheme != "http" && scheme != "https" {
            return Err(format!("unsupported scheme '{}' (expected http or https)", self.scheme));
        }
        if self.host.trim().is_empty() {
            return Err("host must not be empty".to_string());
        }

        // Placeholders bound only at runtime (by extractors) cannot be checked yet.
        let rendered = self.url(plan_scope);
        if !has_placeholders(&rendered) {
            let parsed = url::Url::parse(&rendered).map_err(|e| format!("malformed URL '{rendered}': {e}"))?;
            if parsed.host_str().map_or(true, str::is_empty) {
                return Err(format!("malformed URL '{rendered}': missing host"));
            }
        }
        Ok(())
    }
}

/// Ensure a request path starts with `/`.
fn normalize_path(path: &str) -> String {
    if path.starts_with('/') {
        path.to_owned()
    } else {
        format!("/{path}")
    }
}

impl PostProcessor {
    /// A JSON extractor with no default value.
    pub fn json_extractor(variable: impl Into<String>, json_path: impl Into<String>) -> Self {
        Self::JsonExtractor {
            variable: variable.into(),
            json_path: json_path.into(),
            default: None,
        }
    }

    /// An assertion that the response code equals `code`.
    pub fn response_code_equals(code: impl Into<String>) -> Self {
        Self::ResponseAssertion {
            field: AssertionField::ResponseCode,
            rule: AssertionRule::Equals,
            patterns: vec![code.into()],
            negate: false,
            ignore_status: false,
        }
    }

    fn validate(&self) -> Result<(), String> {
        match self {
            Self::JsonExtractor {
                variable,
                json_path,
                ..
            } => {
                if !is_valid_variable_name(variable) {
                    return Err(format!("extractor variable '{variable}' is not a valid name"));
                }
                JsonPath::parse(json_path)?;
            },
            Self::ResponseAssertion { rule, patterns, .. } => {
                if patterns.is_empty() {
                    return Err("response assertion needs at least one pattern".to_string());
                }
                if matches!(rule, AssertionRule::Contains | AssertionRule::Matches) {
                    for pattern in patterns.iter().filter(|p| !has_placeholders(p)) {
                        regex::Regex::new(pattern)
                            .map_err(|e| format!("invalid assertion pattern '{pattern}': {e}"))?;
                    }
                }
            },
        }
        Ok(())
    }
}

/// Builder for [`TestPlan`]. Validation happens in [`TestPlanBuilder::build`].
#[derive(Debug)]
pub struct TestPlanBuilder {
    name: String,
    serialize_thread_groups: bool,
    variables: BTreeMap<String, String>,
    duplicate_variables: Vec<String>,
    thread_groups: Vec<ThreadGroup>,
}

impl TestPlanBuilder {
    /// Add a user-defined variable. Defining the same name twice fails the build.
    pub fn variable(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        let name = name.into();
        if self.variables.insert(name.clone(), value.into()).is_some() {
            self.duplicate_variables.push(name);
        }
        self
    }

    pub fn serialize_thread_groups(mut self, serialize: bool) -> Self {
        self.serialize_thread_groups = serialize;
        self
    }

    pub fn thread_group(mut self, group: ThreadGroup) -> Self {
        self.thread_groups.push(group);
        self
    }

    /// Validate and return the plan.
    pub fn build(self) -> Result<TestPlan, LoadTestError> {
        if let Some(name) = self.duplicate_variables.first() {
            return Err(LoadTestError::validation(format!(
                "Variable '{name}' is defined more than once"
            )));
        }
        let plan = TestPlan {
            name: self.name,
            serialize_thread_groups: self.serialize_thread_groups,
            variables: self.variables,
            thread_groups: self.thread_groups,
        };
        plan.validate()?;
        Ok(plan)
    }
}

/// Builder for [`ThreadGroup`]; validated as part of the enclosing plan.
#[derive(Debug)]
pub struct ThreadGroupBuilder {
    name: String,
    threads: u32,
    ramp_up_secs: u64,
    loops: u32,
    infinite: bool,
    run_first: bool,
    steps: Vec<RequestStep>,
}

impl ThreadGroupBuilder {
    pub fn threads(mut self, threads: u32) -> Self {
        self.threads = threads;
        self
    }

    pub fn ramp_up_secs(mut self, secs: u64) -> Self {
        self.ramp_up_secs = secs;
        self
    }

    pub fn loops(mut self, loops: u32) -> Self {
        self.loops = loops;
        self
    }

    /// Loop until the run is stopped.
    pub fn infinite(mut self) -> Self {
        self.infinite = true;
        self
    }

    pub fn run_first(mut self, run_first: bool) -> Self {
        self.run_first = run_first;
        self
    }

    pub fn step(mut self, step: RequestStep) -> Self {
        self.steps.push(step);
        self
    }

    pub fn build(self) -> ThreadGroup {
        ThreadGroup {
            name: self.name,
            threads: self.threads,
            ramp_up_secs: self.ramp_up_secs,
            controller: Controller {
                kind: ControllerKind::Loop {
                    loops: self.loops,
                    infinite: self.infinite,
                    run_first: self.run_first,
                },
                steps: self.steps,
            },
        }
    }
}
