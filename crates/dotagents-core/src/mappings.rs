//! Mapping table: which canonical source feeds which per-client targets.

use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::fsops::{path_exists, EntryKind};
use crate::roots::{ResolvedRoots, Scope};

pub const AGENTS_FILE: &str = "AGENTS.md";
pub const CLAUDE_FILE: &str = "CLAUDE.md";
pub const GEMINI_FILE: &str = "GEMINI.md";
pub const COMMANDS_DIR: &str = "commands";
pub const HOOKS_DIR: &str = "hooks";
pub const SKILLS_DIR: &str = "skills";

#[derive(Debug, Copy, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum Client {
    Claude,
    Factory,
    Codex,
    Cursor,
    Opencode,
    Gemini,
}

impl Client {
    pub const ALL: [Client; 6] = [
        Client::Claude,
        Client::Factory,
        Client::Codex,
        Client::Cursor,
        Client::Opencode,
        Client::Gemini,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Claude => "claude",
            Self::Factory => "factory",
            Self::Codex => "codex",
            Self::Cursor => "cursor",
            Self::Opencode => "opencode",
            Self::Gemini => "gemini",
        }
    }

    pub fn display_name(self) -> &'static str {
        match self {
            Self::Claude => "Claude",
            Self::Factory => "Factory",
            Self::Codex => "Codex",
            Self::Cursor => "Cursor",
            Self::Opencode => "OpenCode",
            Self::Gemini => "Gemini",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "claude" => Some(Self::Claude),
            "factory" | "droid" => Some(Self::Factory),
            "codex" => Some(Self::Codex),
            "cursor" => Some(Self::Cursor),
            "opencode" => Some(Self::Opencode),
            "gemini" => Some(Self::Gemini),
            _ => None,
        }
    }

    pub fn root(self, roots: &ResolvedRoots) -> PathBuf {
        let base = &roots.base;
        match (self, roots.scope) {
            (Self::Opencode, Scope::Global) => base.join(".config").join("opencode"),
            (Self::Opencode, Scope::Project) => base.join(".opencode"),
            (Self::Claude, _) => base.join(".claude"),
            (Self::Factory, _) => base.join(".factory"),
            (Self::Codex, _) => base.join(".codex"),
            (Self::Cursor, _) => base.join(".cursor"),
            (Self::Gemini, _) => base.join(".gemini"),
        }
    }

    /// Client directory holding command snippets (codex calls them prompts).
    pub fn commands_dir(self, roots: &ResolvedRoots) -> Option<PathBuf> {
        match self {
            Self::Codex => Some(self.root(roots).join("prompts")),
            Self::Claude | Self::Factory | Self::Cursor | Self::Opencode => {
                Some(self.root(roots).join(COMMANDS_DIR))
            }
            Self::Gemini => None,
        }
    }

    pub fn hooks_dir(self, roots: &ResolvedRoots) -> Option<PathBuf> {
        match self {
            Self::Claude | Self::Factory => Some(self.root(roots).join(HOOKS_DIR)),
            _ => None,
        }
    }

    pub fn skills_dir(self, roots: &ResolvedRoots) -> Option<PathBuf> {
        match self {
            Self::Gemini => None,
            _ => Some(self.root(roots).join(SKILLS_DIR)),
        }
    }

    /// Instructions file the client reads, and the canonical file it should
    /// come from. Only meaningful in global scope.
    pub fn instructions(self, roots: &ResolvedRoots) -> Option<(PathBuf, &'static str)> {
        if roots.scope != Scope::Global {
            return None;
        }
        let root = self.root(roots);
        match self {
            Self::Claude => Some((root.join(CLAUDE_FILE), CLAUDE_FILE)),
            Self::Gemini => Some((root.join(GEMINI_FILE), GEMINI_FILE)),
            Self::Factory | Self::Codex | Self::Opencode => {
                Some((root.join(AGENTS_FILE), AGENTS_FILE))
            }
            Self::Cursor => None,
        }
    }
}

impl fmt::Display for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Copy, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum LinkKind {
    File,
    Dir,
}

impl LinkKind {
    pub fn is_dir(self) -> bool {
        matches!(self, Self::Dir)
    }

    pub fn entry_kind(self) -> EntryKind {
        match self {
            Self::File => EntryKind::File,
            Self::Dir => EntryKind::Dir,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Mapping {
    pub name: String,
    pub source: PathBuf,
    pub targets: Vec<PathBuf>,
    pub kind: LinkKind,
}

/// Deduplicates and orders a client selection the way mappings expect.
pub fn normalize_clients(clients: &[Client]) -> Vec<Client> {
    Client::ALL
        .into_iter()
        .filter(|client| clients.contains(client))
        .collect()
}

/// Builds the mapping table for a scope and client selection. Override
/// files are resolved here, once, against the current canonical root.
pub fn build_mappings(roots: &ResolvedRoots, clients: &[Client]) -> Vec<Mapping> {
    let clients = normalize_clients(clients);
    let canonical = &roots.canonical_root;
    let mut mappings = Vec::new();

    if roots.scope == Scope::Global {
        let agents = canonical.join(AGENTS_FILE);
        let mut shared_targets = Vec::new();
        for client in &clients {
            let Some((target, wanted)) = client.instructions(roots) else {
                continue;
            };
            match wanted {
                CLAUDE_FILE | GEMINI_FILE => {
                    let name = if wanted == CLAUDE_FILE {
                        "claude-md"
                    } else {
                        "gemini-md"
                    };
                    mappings.push(Mapping {
                        name: name.to_string(),
                        source: override_or_shared(canonical, wanted),
                        targets: vec![target],
                        kind: LinkKind::File,
                    });
                }
                _ => shared_targets.push(target),
            }
        }
        if !shared_targets.is_empty() {
            mappings.push(Mapping {
                name: "agents-md".to_string(),
                source: agents,
                targets: shared_targets,
                kind: LinkKind::File,
            });
        }
    }

    let dir_mappings: [(&str, fn(Client, &ResolvedRoots) -> Option<PathBuf>); 3] = [
        (COMMANDS_DIR, Client::commands_dir),
        (HOOKS_DIR, Client::hooks_dir),
        (SKILLS_DIR, Client::skills_dir),
    ];
    for (name, target_of) in dir_mappings {
        let targets: Vec<PathBuf> = clients
            .iter()
            .filter_map(|client| target_of(*client, roots))
            .collect();
        if targets.is_empty() {
            continue;
        }
        mappings.push(Mapping {
            name: name.to_string(),
            source: canonical.join(name),
            targets,
            kind: LinkKind::Dir,
        });
    }

    mappings
}

fn override_or_shared(canonical: &Path, override_name: &str) -> PathBuf {
    let override_path = canonical.join(override_name);
    if path_exists(&override_path) {
        override_path
    } else {
        canonical.join(AGENTS_FILE)
    }
}
