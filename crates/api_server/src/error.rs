use jsonrpsee::types::{ErrorObject, ErrorObjectOwned};
use torrent_node_core::node::NodeError;

const NOT_FOUND: i32 = -32001;
const LIMIT_EXCEEDED: i32 = -32002;
const MODULE_DISABLED: i32 = -32003;
const INTERNAL: i32 = -32099;

/// Maps internal errors onto the JSON error codes clients see.
pub fn rpc_error(err: NodeError) -> ErrorObjectOwned {
    let code = match &err {
        NodeError::NotFound(_) => NOT_FOUND,
        NodeError::LimitExceeded(_) => LIMIT_EXCEEDED,
        NodeError::ModuleDisabled(_) => MODULE_DISABLED,
        _ => INTERNAL,
    };
    if code == INTERNAL {
        tracing::error!(error = %err, "query failed");
    }
    ErrorObject::owned(code, err.to_string(), None::<()>)
}

pub fn invalid_params(message: impl Into<String>) -> ErrorObjectOwned {
    ErrorObject::owned(-32602, message.into(), None::<()>)
}
