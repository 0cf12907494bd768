// Client creation with custom user-agent support for kube 2.x
use crate::error::Result;
use hyper::http::{HeaderName, HeaderValue};
use kube::{Client, Config};
use tracing::warn;

/// Environment variable that overrides the user agent sent to the API server
pub const USER_AGENT_ENV: &str = "KUBECACHE_USER_AGENT";

/// Pick the user agent: the environment override wins over the caller's choice.
#[must_use]
pub fn resolve_user_agent(custom_user_agent: Option<&str>) -> Option<String> {
    std::env::var(USER_AGENT_ENV)
        .ok()
        .filter(|ua| !ua.trim().is_empty())
        .or_else(|| custom_user_agent.map(str::to_string))
}

/// Add a user-agent header to the config. Invalid values are logged and skipped.
pub fn add_user_agent_header(config: &mut Config, user_agent: Option<&str>) {
    let Some(user_agent) = resolve_user_agent(user_agent) else {
        return;
    };

    match HeaderValue::from_str(&user_agent) {
        Ok(header_value) => config
            .headers
            .push((HeaderName::from_static("user-agent"), header_value)),
        Err(e) => warn!("ignoring invalid user agent {user_agent:?}: {e}"),
    }
}

/// Create a new k8s client to interact with k8s cluster api
///
/// # Errors
///
/// Will return `Err` if the kube config can not be inferred or the client can not be built
pub async fn new(custom_user_agent: Option<&str>) -> Result<Client> {
    let mut config = Config::infer().await?;
    add_user_agent_header(&mut config, custom_user_agent);

    let client = Client::try_from(config)?;

    Ok(client)
}

/// Create a client for a named kubeconfig context.
///
/// # Errors
///
/// Will return `Err` if the kubeconfig can not be read or the context does not exist
pub async fn for_context(context: &str, custom_user_agent: Option<&str>) -> Result<Client> {
    let options = kube::config::KubeConfigOptions {
        context: Some(context.to_string()),
        ..Default::default()
    };
    let mut config = Config::from_kubeconfig(&options).await?;
    add_user_agent_header(&mut config, custom_user_agent);

    Ok(Client::try_from(config)?)
}
