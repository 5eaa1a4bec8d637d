/// Default key expression prefix for all eletech state.
pub const KEY_PREFIX: &str = "eletech";

/// Marker segment used for metadata keys (`@/status`).
const META_SEGMENT: &str = "@";

/// Builder for eletech key expressions.
///
/// Key expressions follow the pattern:
/// `<prefix>/<thing>/<channel>` for channel values and
/// `<prefix>/<thing>/@/status` for device status.
#[derive(Debug, Clone)]
pub struct KeyExprBuilder {
    prefix: String,
}

impl Default for KeyExprBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl KeyExprBuilder {
    /// Create a builder using [`KEY_PREFIX`].
    pub fn new() -> Self {
        Self {
            prefix: KEY_PREFIX.to_string(),
        }
    }

    /// Create a builder with a custom prefix.
    pub fn with_prefix(prefix: impl Into<String>) -> Self {
        let prefix = prefix.into();
        Self {
            prefix: prefix.trim_end_matches('/').to_string(),
        }
    }

    /// The prefix all keys start with.
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Build the key for a channel value.
    ///
    /// # Example
    /// ```
    /// use eletech_common::keyexpr::KeyExprBuilder;
    ///
    /// let key = KeyExprBuilder::new().channel("boiler", "channel1");
    /// assert_eq!(key, "eletech/boiler/channel1");
    /// ```
    pub fn channel(&self, thing: &str, channel: &str) -> String {
        format!("{}/{}/{}", self.prefix, thing, channel)
    }

    /// Build the key for a thing's device status.
    ///
    /// # Example
    /// ```
    /// use eletech_common::keyexpr::KeyExprBuilder;
    ///
    /// let key = KeyExprBuilder::new().thing_status("boiler");
    /// assert_eq!(key, "eletech/boiler/@/status");
    /// ```
    pub fn thing_status(&self, thing: &str) -> String {
        format!("{}/{}/{}/status", self.prefix, thing, META_SEGMENT)
    }

    /// Build a wildcard matching everything a thing publishes.
    pub fn thing_wildcard(&self, thing: &str) -> String {
        format!("{}/{}/**", self.prefix, thing)
    }

    /// Build the key for the bridge status.
    ///
    /// # Example
    /// ```
    /// use eletech_common::keyexpr::KeyExprBuilder;
    ///
    /// assert_eq!(KeyExprBuilder::new().bridge_status(), "eletech/@/status");
    /// ```
    pub fn bridge_status(&self) -> String {
        format!("{}/{}/status", self.prefix, META_SEGMENT)
    }
}

/// What a key expression under the prefix refers to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParsedKeyExpr<'a> {
    /// A channel value of a thing.
    Channel { thing: &'a str, channel: &'a str },
    /// The device status of a thing.
    ThingStatus { thing: &'a str },
    /// The bridge status.
    BridgeStatus,
}

/// Parse a key expression produced by [`KeyExprBuilder`] with `prefix`.
///
/// Returns `None` if the key does not match any known shape.
pub fn parse_key_expr<'a>(prefix: &str, key: &'a str) -> Option<ParsedKeyExpr<'a>> {
    let rest = key.strip_prefix(prefix)?.strip_prefix('/')?;
    let parts: Vec<&str> = rest.split('/').collect();

    match *parts.as_slice() {
        [META_SEGMENT, "status"] => Some(ParsedKeyExpr::BridgeStatus),
        [thing, META_SEGMENT, "status"] => Some(ParsedKeyExpr::ThingStatus { thing }),
        [thing, channel] if thing != META_SEGMENT && channel != META_SEGMENT => {
            Some(ParsedKeyExpr::Channel { thing, channel })
        }
        _ => None,
    }
}
