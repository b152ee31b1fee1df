/// Server-side batch pop script
///
/// List mode amortizes round trips by popping up to N items atomically with a
/// Lua script. Running it server-side also means no other consumer of the same
/// list can interleave between the pops.
///
/// The script is installed with `SCRIPT LOAD` and invoked with `EVALSHA`; the
/// returned SHA1 is the [`ScriptHandle`]. A restarted server forgets it and
/// answers `NOSCRIPT`, at which point the handle is loaded again.

use crate::redis::connection::{BrokerConnection, BrokerError};
use std::fmt;

/// Pops up to `ARGV[1]` items from the head of `KEYS[1]`
///
/// Clamped to the list length first so a short list never yields nil padding.
pub const BATCH_POP_SCRIPT: &str = r#"
local count = tonumber(ARGV[1])
local items = {}
local available = redis.call('llen', KEYS[1])
if available < count then
  count = available
end
while count > 0 do
  local item = redis.call('lpop', KEYS[1])
  if not item then
    break
  end
  table.insert(items, item)
  count = count - 1
end
return items
"#;

/// Opaque reference to an installed script (its SHA1 digest)
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ScriptHandle(String);

impl ScriptHandle {
    pub fn new(sha: impl Into<String>) -> Self {
        ScriptHandle(sha.into())
    }

    /// Handle the server will assign to `body`
    pub fn digest(body: &str) -> Self {
        ScriptHandle(redis::Script::new(body).get_hash().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ScriptHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Installs [`BATCH_POP_SCRIPT`] on the connection
///
/// # Errors
///
/// `BrokerError::Capability` if the server has no scripting support; this is
/// not retryable.
pub async fn load(connection: &mut dyn BrokerConnection) -> Result<ScriptHandle, BrokerError> {
    let handle = connection.script_load(BATCH_POP_SCRIPT).await?;
    tracing::debug!(sha = %handle, "Loaded batch pop script");
    Ok(handle)
}
