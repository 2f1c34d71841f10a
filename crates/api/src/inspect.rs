//! Typed client for the openbase introspection surface: the backend walks a
//! Django project and reports its apps, models, serializers, background
//! tasks, management commands, and URL wiring as JSON.

use serde::Deserialize;

use crate::client::get_json;
use crate::error::{ApiResult, DecodePayloadSnafu};
use snafu::ResultExt;

/// One Django app discovered inside the inspected project.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct AppInfo {
    pub name: String,
    #[serde(default)]
    pub path: String,
    pub package_name: String,
}

/// One model field with its keyword arguments as written in source.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct FieldInfo {
    pub name: String,
    #[serde(rename = "type")]
    pub field_type: String,
    #[serde(default)]
    pub kwargs: serde_json::Value,
    #[serde(default)]
    pub choices: Option<Vec<(String, String)>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct MethodInfo {
    pub name: String,
    #[serde(default)]
    pub docstring: Option<String>,
    #[serde(default)]
    pub body: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PropertyInfo {
    pub name: String,
    #[serde(default)]
    pub docstring: Option<String>,
    #[serde(default)]
    pub body: String,
}

/// Source body of an overridden method such as `save` or `__str__`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct BodyInfo {
    pub body: String,
    #[serde(default)]
    pub docstring: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ModelInfo {
    pub name: String,
    #[serde(default)]
    pub lineno: Option<u32>,
    #[serde(default)]
    pub end_lineno: Option<u32>,
    #[serde(default)]
    pub docstring: String,
    #[serde(default)]
    pub fields: Vec<FieldInfo>,
    #[serde(default)]
    pub meta: serde_json::Value,
    #[serde(default)]
    pub methods: Vec<MethodInfo>,
    #[serde(default)]
    pub properties: Vec<PropertyInfo>,
    #[serde(default)]
    pub save_method: Option<BodyInfo>,
    #[serde(default)]
    pub str_method: Option<BodyInfo>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct CustomFieldInfo {
    pub name: String,
    #[serde(rename = "type")]
    pub field_type: String,
    #[serde(default)]
    pub kwargs: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SerializerInfo {
    pub name: String,
    #[serde(default)]
    pub model: String,
    #[serde(default)]
    pub fields: Vec<String>,
    #[serde(default)]
    pub read_only_fields: Vec<String>,
    #[serde(default)]
    pub custom_fields: Vec<CustomFieldInfo>,
    #[serde(default)]
    pub create_method: Option<BodyInfo>,
}

/// Argument layout of one background task function.
#[derive(Debug, Clone, PartialEq, Deserialize, Default)]
pub struct TaskArgs {
    #[serde(default)]
    pub regular_args: Vec<String>,
    #[serde(default)]
    pub keyword_only: Vec<String>,
    #[serde(default)]
    pub positional_only: Vec<String>,
    #[serde(default)]
    pub defaults: serde_json::Value,
    #[serde(default)]
    pub vararg: Option<String>,
    #[serde(default)]
    pub kwarg: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct TaskInfo {
    pub name: String,
    #[serde(default)]
    pub path: String,
    #[serde(default)]
    pub app_name: String,
    #[serde(default)]
    pub package_name: String,
    #[serde(default)]
    pub is_async: bool,
    #[serde(default)]
    pub docstring: String,
    #[serde(default)]
    pub body_source: String,
    #[serde(default)]
    pub args: TaskArgs,
}

/// Listing entry for one management command; details load separately.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CommandInfo {
    pub name: String,
    #[serde(default)]
    pub file: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct CommandArgument {
    #[serde(default)]
    pub names: Vec<String>,
    #[serde(default)]
    pub kwargs: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct CommandDetail {
    pub name: String,
    #[serde(default)]
    pub help: String,
    #[serde(default)]
    pub arguments: Vec<CommandArgument>,
    #[serde(default)]
    pub handle_body_source: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct UrlPattern {
    #[serde(default)]
    pub name: String,
    pub route: String,
    #[serde(default)]
    pub view_name: String,
    #[serde(default)]
    pub view_type: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RouterRegistration {
    pub prefix: String,
    pub viewset: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Default)]
pub struct EndpointsInfo {
    #[serde(default)]
    pub urlpatterns: Vec<UrlPattern>,
    #[serde(default)]
    pub router_registrations: Vec<RouterRegistration>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ViewSetMethod {
    pub name: String,
    #[serde(default)]
    pub lineno: Option<u32>,
    #[serde(default)]
    pub end_lineno: Option<u32>,
    #[serde(default)]
    pub body: String,
    #[serde(default)]
    pub docstring: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ViewSetAction {
    pub name: String,
    #[serde(default)]
    pub lineno: Option<u32>,
    #[serde(default)]
    pub end_lineno: Option<u32>,
    #[serde(default)]
    pub body: String,
    #[serde(default)]
    pub docstring: String,
    #[serde(default)]
    pub decorator_args: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ViewSetInfo {
    pub name: String,
    #[serde(default)]
    pub lineno: Option<u32>,
    #[serde(default)]
    pub end_lineno: Option<u32>,
    #[serde(default)]
    pub docstring: String,
    #[serde(default)]
    pub serializer_class: String,
    #[serde(default)]
    pub permission_classes: Vec<String>,
    #[serde(default)]
    pub lookup_field: Option<String>,
    #[serde(default)]
    pub lookup_url_kwarg: Option<String>,
    #[serde(default)]
    pub queryset_definition: Option<String>,
    #[serde(default)]
    pub methods: Vec<ViewSetMethod>,
    #[serde(default)]
    pub actions: Vec<ViewSetAction>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ViewsInfo {
    #[serde(default)]
    pub viewsets: Vec<ViewSetInfo>,
    #[serde(default)]
    pub django_root: String,
}

/// Client for the openbase API surface, rooted at the openbase prefix,
/// e.g. `http://127.0.0.1:8000/api/openbase`.
#[derive(Debug, Clone)]
pub struct InspectClient {
    http: reqwest::Client,
    base_url: String,
}

impl InspectClient {
    pub fn new(http: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn app_endpoint(&self, project: &str, package: &str, app: &str, tail: &str) -> String {
        format!(
            "{}/projects/{project}/packages/{package}/apps/{app}/{tail}",
            self.base_url
        )
    }

    /// Lists the project's apps. A payload that is not an array decodes to
    /// an empty listing rather than an error, matching the lenient backend.
    pub async fn list_apps(&self, project: &str) -> ApiResult<Vec<AppInfo>> {
        let url = format!("{}/projects/{project}/apps/", self.base_url);
        let payload: serde_json::Value = get_json(&self.http, &url, "list-apps").await?;

        if !payload.is_array() {
            tracing::warn!(url = %url, "apps listing was not an array; treating as empty");
            return Ok(Vec::new());
        }

        serde_json::from_value(payload).context(DecodePayloadSnafu {
            stage: "list-apps",
            url,
        })
    }

    /// Resolves the package that owns an app, needed to build per-app URLs.
    pub async fn package_for_app(&self, project: &str, app: &str) -> ApiResult<Option<String>> {
        let apps = self.list_apps(project).await?;
        Ok(apps
            .into_iter()
            .find(|info| info.name == app)
            .map(|info| info.package_name))
    }

    pub async fn list_models(
        &self,
        project: &str,
        package: &str,
        app: &str,
    ) -> ApiResult<Vec<ModelInfo>> {
        let url = self.app_endpoint(project, package, app, "models/");
        get_json(&self.http, &url, "list-models").await
    }

    pub async fn list_serializers(
        &self,
        project: &str,
        package: &str,
        app: &str,
    ) -> ApiResult<Vec<SerializerInfo>> {
        let url = self.app_endpoint(project, package, app, "serializers/");
        get_json(&self.http, &url, "list-serializers").await
    }

    pub async fn list_tasks(
        &self,
        project: &str,
        package: &str,
        app: &str,
    ) -> ApiResult<Vec<TaskInfo>> {
        let url = self.app_endpoint(project, package, app, "tasks/");
        get_json(&self.http, &url, "list-tasks").await
    }

    /// Lists management commands. The backend has shipped both a bare array
    /// and a `{commands: [...]}` wrapper, so both shapes are accepted.
    pub async fn list_commands(
        &self,
        project: &str,
        package: &str,
        app: &str,
    ) -> ApiResult<Vec<CommandInfo>> {
        let url = self.app_endpoint(project, package, app, "commands/");
        let payload: serde_json::Value = get_json(&self.http, &url, "list-commands").await?;

        let listing = if payload.is_array() {
            payload
        } else {
            payload
                .get("commands")
                .cloned()
                .unwrap_or_else(|| serde_json::Value::Array(Vec::new()))
        };

        serde_json::from_value(listing).context(DecodePayloadSnafu {
            stage: "list-commands",
            url,
        })
    }

    pub async fn command_detail(
        &self,
        project: &str,
        package: &str,
        app: &str,
        command: &str,
    ) -> ApiResult<CommandDetail> {
        let url = self.app_endpoint(project, package, app, &format!("commands/{command}/"));
        get_json(&self.http, &url, "command-detail").await
    }

    pub async fn endpoints(
        &self,
        project: &str,
        package: &str,
        app: &str,
    ) -> ApiResult<EndpointsInfo> {
        let url = self.app_endpoint(project, package, app, "urls/");
        get_json(&self.http, &url, "endpoints").await
    }

    /// Viewset details. Optional server-side: older backends do not serve
    /// this route, so callers should treat a failure as "no view data".
    pub async fn views(&self, project: &str, package: &str, app: &str) -> ApiResult<ViewsInfo> {
        let url = self.app_endpoint(project, package, app, "views/");
        get_json(&self.http, &url, "views").await
    }
}
