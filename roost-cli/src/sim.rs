//! Simulated remote service.
//!
//! Seeds a scripted `MemoryRemote` with a small deterministic feed of
//! posts and messages so every command has something to sync against.
//! The `[sim]` section of the config injects offline and failure modes.

use roost::{Entity, EntityKind, MemoryRemote};
use serde::{Deserialize, Serialize};

use crate::config::Config;

/// Simulated backend behavior, set in the config file.
#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SimConfig {
    /// Pretend there is no connectivity.
    pub offline: bool,
    /// Reject every mutation with a server error.
    pub fail_mutations: bool,
    /// Fail the first fetch of each run with a network error.
    pub fail_first_fetch: bool,
}

fn post(id: &str, author: &str, created_at: i64, content: &str) -> Entity {
    Entity {
        id: id.into(),
        author: author.into(),
        created_at,
        revision: 1,
        content: Some(content.to_string()),
        ..Default::default()
    }
}

fn message(id: &str, from: &str, to: &str, created_at: i64, content: &str) -> Entity {
    Entity {
        kind: EntityKind::Message,
        recipient: Some(to.into()),
        ..post(id, from, created_at, content)
    }
}

/// Build the seeded remote for this invocation.
pub fn build_remote(config: &Config) -> MemoryRemote {
    let owner = config.owner.as_str();
    let remote = MemoryRemote::new();

    remote.set_pages(vec![
        vec![
            Some(message("m-104", "dana", owner, 104_000, "lunch tomorrow?")),
            Some(post("p-103", "casey", 103_000, "shipping the new build tonight")),
            Some(post("p-102", "blair", 102_000, "anyone else seeing slow feeds?")),
            // An ID the service could not materialize.
            None,
            Some(message("m-101", owner, "dana", 101_000, "sounds good, see you then")),
        ],
        vec![
            Some(post("p-53", "casey", 53_000, "hot take: pagination is hard")),
            Some(message("m-52", "evan", owner, 52_000, "did you get my file?")),
            Some(post("p-51", "blair", 51_000, "good morning feed")),
        ],
    ]);

    remote.set_online(!config.sim.offline);
    remote.set_fail_mutations(config.sim.fail_mutations);
    if config.sim.fail_first_fetch {
        remote.fail_next_fetch();
    }

    remote
}
