/// Where a manager operation was invoked from.
///
/// Errors reported on behalf of a script call carry the script location.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum CallContext {
    #[default]
    Internal,
    Script {
        location: String,
    },
}

impl CallContext {
    pub fn script(location: impl Into<String>) -> Self {
        CallContext::Script {
            location: location.into(),
        }
    }

    pub(crate) fn decorate(
        &self,
        message: &str,
    ) -> String {
        match self {
            CallContext::Internal => message.to_string(),
            CallContext::Script { location } => format!("{}: {}", location, message),
        }
    }
}
