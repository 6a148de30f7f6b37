//! Fixed on-disk locations inside the agent image.

/// Home of the agent's state directory.
pub const AGENT_STATE_DIR: &str = "/home/node/.openclaw";

/// Structural document read (and strictly validated) by the agent.
pub const STRUCTURAL_DOCUMENT_PATH: &str = "/home/node/.openclaw/openclaw.json";

/// Secret store under the main agent's profile directory.
pub const SECRET_STORE_PATH: &str = "/home/node/.openclaw/agents/main/agent/auth-profiles.json";

/// Unprivileged user the agent runs as.
pub const AGENT_UID: u64 = 1000;
pub const AGENT_GID: u64 = 1000;
pub const AGENT_USER: &str = "node";
