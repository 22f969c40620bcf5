//! Flavor profiles: per-server-variant console matchers

use regex::{Captures, Regex};
use scriptserver_core::config::DEFAULT_FLAVOR;
use scriptserver_core::{
    EventKind, EventPayload, FlavorPatterns, Result, ScriptServerConfig, ScriptServerError,
};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};

/// Pure line matcher: structured fields, or `None` for no match
pub type MatchFn = Arc<dyn Fn(&str) -> Option<EventPayload> + Send + Sync>;

const VANILLA_PREFIX: &str = r"^\[[\d:]{8}\] \[Server thread/INFO\]: ";

/// Matchers for one flavor. Any kind may be left unset.
#[derive(Clone, Default)]
pub struct FlavorMatcherSet {
    matchers: HashMap<EventKind, MatchFn>,
    ready: Option<Regex>,
}

impl fmt::Debug for FlavorMatcherSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kinds: Vec<_> = EventKind::ALL
            .iter()
            .filter(|kind| self.matchers.contains_key(*kind))
            .collect();
        f.debug_struct("FlavorMatcherSet")
            .field("kinds", &kinds)
            .field("ready", &self.ready.as_ref().map(Regex::as_str))
            .finish()
    }
}

impl FlavorMatcherSet {
    /// Empty set; every kind falls back to the default flavor
    pub fn new() -> Self {
        Self::default()
    }

    /// Matchers for the vanilla server log format
    pub fn vanilla() -> Result<Self> {
        let prefixed = |rest: &str| format!("{VANILLA_PREFIX}{rest}");

        let mut set = Self::new();
        set.insert_pattern(EventKind::Chat, &format!("(?i){}", prefixed(r"<(\w+)> (.*)")))?;
        set.insert_pattern(EventKind::Login, &prefixed(r"(\w+)\[/([\d.:]+)\] logged in"))?;
        set.insert_pattern(EventKind::Logout, &prefixed(r"(\w+) lost connection: (.+)"))?;
        set.insert_pattern(
            EventKind::Achievement,
            &prefixed(r"(\w+) has made the advancement \[([\w\s]+)\]"),
        )?;
        set.insert_pattern(EventKind::Started, &prefixed("Done"))?;
        set.insert_pattern(EventKind::Stopped, &prefixed("Stopping server"))?;
        set.set_ready(&format!("(?i){}", prefixed("RCON running")))?;
        Ok(set)
    }

    /// Compile the regex overrides of one configured flavor
    pub fn from_patterns(patterns: &FlavorPatterns) -> Result<Self> {
        let mut set = Self::new();
        let overrides = [
            (EventKind::Chat, &patterns.chat),
            (EventKind::Login, &patterns.login),
            (EventKind::Logout, &patterns.logout),
            (EventKind::Achievement, &patterns.achievement),
            (EventKind::Started, &patterns.started),
            (EventKind::Stopped, &patterns.stopped),
        ];
        for (kind, pattern) in overrides {
            if let Some(pattern) = pattern {
                set.insert_pattern(kind, pattern)?;
            }
        }
        if let Some(ready) = &patterns.ready {
            set.set_ready(ready)?;
        }
        Ok(set)
    }

    /// Register a custom matcher, replacing any previous one for `kind`
    pub fn insert<F>(&mut self, kind: EventKind, matcher: F)
    where
        F: Fn(&str) -> Option<EventPayload> + Send + Sync + 'static,
    {
        self.matchers.insert(kind, Arc::new(matcher));
    }

    pub fn with_matcher<F>(mut self, kind: EventKind, matcher: F) -> Self
    where
        F: Fn(&str) -> Option<EventPayload> + Send + Sync + 'static,
    {
        self.insert(kind, matcher);
        self
    }

    /// Register a regex matcher for `kind`
    pub fn insert_pattern(&mut self, kind: EventKind, pattern: &str) -> Result<()> {
        self.matchers.insert(kind, pattern_matcher(kind, pattern)?);
        Ok(())
    }

    /// Set the readiness line pattern
    pub fn set_ready(&mut self, pattern: &str) -> Result<()> {
        self.ready = Some(compile("ready", pattern)?);
        Ok(())
    }

    pub fn get(&self, kind: EventKind) -> Option<&MatchFn> {
        self.matchers.get(&kind)
    }

    pub fn ready(&self) -> Option<&Regex> {
        self.ready.as_ref()
    }

    /// Copy every matcher set in `other` over this set
    fn merge(&mut self, other: FlavorMatcherSet) {
        self.matchers.extend(other.matchers);
        if other.ready.is_some() {
            self.ready = other.ready;
        }
    }
}

/// Build a matcher from a regex.
///
/// Fields come from named groups (`player`, `message`, `ip`, `reason`,
/// `achievement`) when present, else from positional groups 1 and 2.
/// `started` and `stopped` need no groups.
pub fn pattern_matcher(kind: EventKind, pattern: &str) -> Result<MatchFn> {
    let regex = compile(kind.as_str(), pattern)?;

    let fields = field_names(kind);
    if let Some((first, second)) = fields {
        let named = [first, second]
            .iter()
            .all(|name| regex.capture_names().flatten().any(|n| n == *name));
        if !named && regex.captures_len() < 3 {
            return Err(ScriptServerError::Pattern {
                name: kind.as_str().to_string(),
                reason: format!("needs groups for {first} and {second}"),
            });
        }
    }

    Ok(Arc::new(move |line: &str| {
        let caps = regex.captures(line)?;
        let payload = match fields {
            None if kind == EventKind::Started => EventPayload::Started,
            None => EventPayload::Stopped,
            Some((first, second)) => {
                let a = field(&caps, first, 1);
                let b = field(&caps, second, 2);
                match kind {
                    EventKind::Chat => EventPayload::Chat {
                        player: a,
                        message: b,
                    },
                    EventKind::Login => EventPayload::Login { player: a, ip: b },
                    EventKind::Logout => EventPayload::Logout {
                        player: a,
                        reason: b,
                    },
                    _ => EventPayload::Achievement {
                        player: a,
                        achievement: b,
                    },
                }
            }
        };
        Some(payload)
    }))
}

fn field_names(kind: EventKind) -> Option<(&'static str, &'static str)> {
    match kind {
        EventKind::Chat => Some(("player", "message")),
        EventKind::Login => Some(("player", "ip")),
        EventKind::Logout => Some(("player", "reason")),
        EventKind::Achievement => Some(("player", "achievement")),
        EventKind::Started | EventKind::Stopped => None,
    }
}

fn field(caps: &Captures<'_>, name: &str, index: usize) -> String {
    caps.name(name)
        .or_else(|| caps.get(index))
        .map(|m| m.as_str().to_string())
        .unwrap_or_default()
}

fn compile(name: &str, pattern: &str) -> Result<Regex> {
    Regex::new(pattern).map_err(|e| ScriptServerError::Pattern {
        name: name.to_string(),
        reason: e.to_string(),
    })
}

/// Named flavors plus the active selection
#[derive(Debug, Clone)]
pub struct FlavorRegistry {
    active: String,
    flavors: HashMap<String, FlavorMatcherSet>,
}

impl FlavorRegistry {
    /// Registry holding the vanilla matchers as the default flavor
    pub fn new(active: impl Into<String>) -> Result<Self> {
        let mut flavors = HashMap::new();
        flavors.insert(DEFAULT_FLAVOR.to_string(), FlavorMatcherSet::vanilla()?);
        Ok(Self {
            active: active.into(),
            flavors,
        })
    }

    /// Vanilla defaults with every `[flavors.*]` override from the config
    /// applied. Overrides of the default flavor replace individual vanilla
    /// matchers.
    pub fn from_config(config: &ScriptServerConfig) -> Result<Self> {
        let mut registry = Self::new(config.flavor.clone())?;
        for (name, patterns) in &config.flavors {
            debug!("Loading flavor {}", name);
            registry.register(name.clone(), FlavorMatcherSet::from_patterns(patterns)?);
        }
        if !registry.flavors.contains_key(&registry.active) {
            warn!(
                "Flavor {:?} has no overrides, using {} matchers",
                registry.active, DEFAULT_FLAVOR
            );
        }
        Ok(registry)
    }

    /// Add matchers under `name`. Registering the default flavor merges into
    /// the existing defaults instead of replacing them.
    pub fn register(&mut self, name: impl Into<String>, set: FlavorMatcherSet) {
        let name = name.into();
        if name == DEFAULT_FLAVOR {
            if let Some(existing) = self.flavors.get_mut(&name) {
                existing.merge(set);
                return;
            }
        }
        self.flavors.insert(name, set);
    }

    pub fn active(&self) -> &str {
        &self.active
    }

    pub fn set_active(&mut self, name: impl Into<String>) {
        self.active = name.into();
    }

    /// Active flavor's matcher for `kind`, else the default flavor's
    pub fn matcher(&self, kind: EventKind) -> Option<&MatchFn> {
        self.flavors
            .get(&self.active)
            .and_then(|set| set.get(kind))
            .or_else(|| self.default_set().and_then(|set| set.get(kind)))
    }

    /// Active flavor's readiness pattern, else the default flavor's
    pub fn ready_pattern(&self) -> Option<&Regex> {
        self.flavors
            .get(&self.active)
            .and_then(FlavorMatcherSet::ready)
            .or_else(|| self.default_set().and_then(FlavorMatcherSet::ready))
    }

    fn default_set(&self) -> Option<&FlavorMatcherSet> {
        self.flavors.get(DEFAULT_FLAVOR)
    }
}
