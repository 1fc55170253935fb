//! robots.txt cache and evaluator
//!
//! Each origin's robots.txt is fetched at most once per process. Concurrent
//! first callers for the same origin share one fetch: the map entry only
//! hands out the origin's one-time cell, and the fetch runs outside the map
//! lock. Origins whose robots.txt cannot be retrieved are cached as
//! [`RobotsPolicy::Unreachable`] and resolved by the configured
//! [`RobotsFailurePolicy`].

use dashmap::DashMap;
use reqwest::{Client, Url};
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::{debug, warn};

use intel_core::RobotsFailurePolicy;

/// A single Allow/Disallow line
#[derive(Debug, Clone, PartialEq, Eq)]
struct Rule {
    allow: bool,
    path: String,
}

/// Rules shared by one or more user-agent lines
#[derive(Debug, Clone, Default)]
struct Group {
    agents: Vec<String>,
    rules: Vec<Rule>,
}

/// Parsed robots.txt rules
#[derive(Debug, Clone, Default)]
pub struct RobotsTxt {
    groups: Vec<Group>,
}

impl RobotsTxt {
    /// Parse robots.txt content
    pub fn parse(content: &str) -> Self {
        let mut robots = Self::default();
        let mut current = Group::default();
        let mut rules_seen = false;

        for raw in content.lines() {
            let line = raw.split('#').next().unwrap_or("").trim();
            if line.is_empty() {
                continue;
            }

            let Some((directive, value)) = line.split_once(':') else {
                continue;
            };
            let directive = directive.trim().to_lowercase();
            let value = value.trim();

            match directive.as_str() {
                "user-agent" => {
                    // A user-agent after rules starts a new group
                    if rules_seen {
                        robots.groups.push(std::mem::take(&mut current));
                        rules_seen = false;
                    }
                    current.agents.push(value.to_lowercase());
                }
                "allow" | "disallow" => {
                    if current.agents.is_empty() {
                        continue;
                    }
                    rules_seen = true;
                    if !value.is_empty() {
                        current.rules.push(Rule {
                            allow: directive == "allow",
                            path: encode_rule_path(value),
                        });
                    }
                }
                _ => {}
            }
        }

        if !current.agents.is_empty() {
            robots.groups.push(current);
        }
        robots
    }

    /// Rules that refuse every path for every agent
    pub fn disallow_all() -> Self {
        Self {
            groups: vec![Group {
                agents: vec!["*".to_string()],
                rules: vec![Rule {
                    allow: false,
                    path: "/".to_string(),
                }],
            }],
        }
    }

    /// Check if a path (with query) is allowed for a user-agent.
    ///
    /// The agent's product token (text before `/`) selects the first group
    /// naming it, falling back to `*`. Within the group the longest matching
    /// rule decides, `Allow` winning ties.
    pub fn is_allowed(&self, user_agent: &str, path: &str) -> bool {
        let token = user_agent
            .split('/')
            .next()
            .unwrap_or("")
            .trim()
            .to_lowercase();

        let group = self
            .groups
            .iter()
            .find(|g| {
                g.agents
                    .iter()
                    .any(|a| a != "*" && !token.is_empty() && token.contains(a.as_str()))
            })
            .or_else(|| self.groups.iter().find(|g| g.agents.iter().any(|a| a == "*")));

        let Some(group) = group else {
            return true;
        };

        group
            .rules
            .iter()
            .filter(|rule| path.starts_with(&rule.path))
            .max_by(|a, b| a.path.len().cmp(&b.path.len()).then(a.allow.cmp(&b.allow)))
            .map(|rule| rule.allow)
            .unwrap_or(true)
    }
}

/// Percent-encode a rule path the way request URLs are encoded, so both
/// sides of the prefix match use the same form
fn encode_rule_path(raw: &str) -> String {
    let separator = if raw.starts_with('/') { "" } else { "/" };
    match Url::parse(&format!("http://robots.invalid{}{}", separator, raw)) {
        Ok(url) => {
            let mut path = url.path().to_string();
            if let Some(query) = url.query() {
                path.push('?');
                path.push_str(query);
            }
            path
        }
        Err(_) => raw.to_string(),
    }
}

/// Cached robots decision source for one origin
#[derive(Debug, Clone)]
pub enum RobotsPolicy {
    Rules(RobotsTxt),
    /// robots.txt could not be retrieved
    Unreachable,
}

impl RobotsPolicy {
    pub fn allows(&self, user_agent: &str, path: &str, on_failure: RobotsFailurePolicy) -> bool {
        match self {
            RobotsPolicy::Rules(rules) => rules.is_allowed(user_agent, path),
            RobotsPolicy::Unreachable => on_failure.permits_unreachable(),
        }
    }
}

/// Per-origin robots.txt cache
pub struct RobotsGate {
    client: Client,
    on_failure: RobotsFailurePolicy,
    cache: DashMap<String, Arc<OnceCell<RobotsPolicy>>>,
}

impl RobotsGate {
    pub fn new(client: Client, on_failure: RobotsFailurePolicy) -> Self {
        Self {
            client,
            on_failure,
            cache: DashMap::new(),
        }
    }

    /// Whether `user_agent` may fetch `url` according to its origin's robots.txt
    pub async fn can_fetch(&self, user_agent: &str, url: &Url) -> bool {
        let origin = url.origin().ascii_serialization();
        let cell = Arc::clone(&self.cache.entry(origin.clone()).or_default());

        let policy = cell
            .get_or_init(|| async {
                debug!("Fetching robots.txt for {}", origin);
                self.fetch_policy(&origin).await
            })
            .await;

        let mut path = url.path().to_string();
        if let Some(query) = url.query() {
            path.push('?');
            path.push_str(query);
        }
        policy.allows(user_agent, &path, self.on_failure)
    }

    /// Number of origins with a cached (or in-flight) policy
    pub fn cached_origins(&self) -> usize {
        self.cache.len()
    }

    async fn fetch_policy(&self, origin: &str) -> RobotsPolicy {
        let robots_url = format!("{}/robots.txt", origin.trim_end_matches('/'));

        let response = match self.client.get(&robots_url).send().await {
            Ok(response) => response,
            Err(e) => {
                warn!("robots.txt unreachable for {}: {}", origin, e);
                return RobotsPolicy::Unreachable;
            }
        };

        let status = response.status();
        if status.is_success() {
            match response.text().await {
                Ok(body) => RobotsPolicy::Rules(RobotsTxt::parse(&body)),
                Err(e) => {
                    warn!("Failed to read robots.txt for {}: {}", origin, e);
                    RobotsPolicy::Unreachable
                }
            }
        } else if status.as_u16() == 401 || status.as_u16() == 403 {
            RobotsPolicy::Rules(RobotsTxt::disallow_all())
        } else if status.is_client_error() {
            RobotsPolicy::Rules(RobotsTxt::default())
        } else {
            warn!("robots.txt for {} returned {}", origin, status);
            RobotsPolicy::Unreachable
        }
    }
}
