//! CephX 用户相关领域模型

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// 单条 CephX capability，例如 `{"entity": "mds", "cap": "allow rw"}`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capability {
    /// daemon 类型：mon / mds / osd / mgr
    pub entity: String,
    pub cap: String,
}

impl Capability {
    pub fn new(entity: impl Into<String>, cap: impl Into<String>) -> Self {
        Self {
            entity: entity.into(),
            cap: cap.into(),
        }
    }
}

/// 模板渲染错误
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TemplateError {
    #[error("unknown placeholder '{{{0}}}' in capability template")]
    UnknownPlaceholder(String),
    #[error("unbalanced brace in capability template '{0}'")]
    Unbalanced(String),
}

/// 模板占位符取值
///
/// 支持 `{fs}` `{path}` `{group}` `{subvol}`，`{{` `}}` 转义为字面量大括号
#[derive(Debug, Clone)]
pub struct TemplateVars<'a> {
    pub fs: &'a str,
    pub path: &'a str,
    pub group: &'a str,
    pub subvol: &'a str,
}

impl<'a> TemplateVars<'a> {
    fn lookup(&self, name: &str) -> Option<&'a str> {
        match name {
            "fs" => Some(self.fs),
            "path" => Some(self.path),
            "group" => Some(self.group),
            "subvol" => Some(self.subvol),
            _ => None,
        }
    }
}

/// 渲染单个 capability 字符串
pub fn render_cap(template: &str, vars: &TemplateVars<'_>) -> Result<String, TemplateError> {
    let mut out = String::with_capacity(template.len());
    let mut chars = template.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '{' if chars.peek() == Some(&'{') => {
                chars.next();
                out.push('{');
            }
            '{' => {
                let mut name = String::new();
                loop {
                    match chars.next() {
                        Some('}') => break,
                        Some(ch) => name.push(ch),
                        None => return Err(TemplateError::Unbalanced(template.to_string())),
                    }
                }
                let value = vars
                    .lookup(name.trim())
                    .ok_or(TemplateError::UnknownPlaceholder(name))?;
                out.push_str(value);
            }
            '}' if chars.peek() == Some(&'}') => {
                chars.next();
                out.push('}');
            }
            '}' => return Err(TemplateError::Unbalanced(template.to_string())),
            _ => out.push(c),
        }
    }

    Ok(out)
}

/// 渲染一组 capability 模板
pub fn render_caps(
    templates: &[Capability],
    vars: &TemplateVars<'_>,
) -> Result<Vec<Capability>, TemplateError> {
    templates
        .iter()
        .map(|t| Ok(Capability::new(t.entity.clone(), render_cap(&t.cap, vars)?)))
        .collect()
}

/// 校验 CephX entity 名称（`<type>.<id>`）
///
/// entity 会被拼接进远端 shell 命令和临时文件名，只允许安全字符
pub fn validate_entity(entity: &str) -> Result<(), String> {
    let (kind, id) = entity
        .split_once('.')
        .ok_or_else(|| format!("invalid CephX entity '{}': expected <type>.<id>", entity))?;

    let kind_ok = !kind.is_empty() && kind.chars().all(|c| c.is_ascii_alphabetic());
    let id_ok = !id.is_empty()
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '@' | '-'));

    if kind_ok && id_ok {
        Ok(())
    } else {
        Err(format!("invalid CephX entity '{}'", entity))
    }
}

/// 返回给调用方的 CephX 用户
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CephUser {
    pub user_entity: String,
    pub capabilities: Vec<Capability>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub keys: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cluster: Option<String>,
}

impl CephUser {
    /// 从 Dashboard `/api/cluster/user` 返回的对象构造
    ///
    /// Dashboard 返回 `{"entity": "...", "caps": {"mon": "allow r"}, "key": "..."}`，
    /// 不同版本的字段名略有差异。密钥不会被带出
    pub fn from_dashboard(raw: &Value, cluster: &str) -> Option<Self> {
        let user_entity = dashboard_entity(raw)?.to_string();

        let capabilities = match (raw.get("caps"), raw.get("capabilities")) {
            (Some(Value::Object(map)), _) => map
                .iter()
                .map(|(daemon, cap)| {
                    Capability::new(daemon.clone(), cap.as_str().unwrap_or_default())
                })
                .collect(),
            (_, Some(list @ Value::Array(_))) => {
                serde_json::from_value(list.clone()).unwrap_or_default()
            }
            _ => Vec::new(),
        };

        Some(Self {
            user_entity,
            capabilities,
            keys: Vec::new(),
            cluster: Some(cluster.to_string()),
        })
    }
}

/// Dashboard 用户对象中的 entity 字段
pub fn dashboard_entity(raw: &Value) -> Option<&str> {
    ["user_entity", "entity", "id"]
        .iter()
        .find_map(|k| raw.get(*k).and_then(Value::as_str))
}

// ========== 请求体 ==========

/// POST /cluster/user
#[derive(Debug, Clone, Deserialize)]
pub struct CreateUserTemplatedRequest {
    pub user_entity: String,
    #[serde(default)]
    pub template_capabilities: Vec<Capability>,
    pub render: Option<RenderSpec>,
    #[serde(default = "default_true")]
    pub sync_across_clusters: bool,
    pub preferred_source: Option<String>,
}

/// 模板渲染参数
#[derive(Debug, Clone, Deserialize)]
pub struct RenderSpec {
    #[serde(default)]
    pub fs_name: String,
    #[serde(default)]
    pub subvol_name: String,
    pub group_name: Option<String>,
}

fn default_true() -> bool {
    true
}

/// PUT /cluster/user
#[derive(Debug, Clone, Deserialize)]
pub struct CreateOrUpdateUserRequest {
    pub user_entity: String,
    #[serde(default)]
    pub capabilities: Vec<Capability>,
}

/// POST /cluster/user/export
#[derive(Debug, Clone, Deserialize)]
pub struct ExportUsersRequest {
    #[serde(default)]
    pub entities: Vec<String>,
    /// 只返回 `[entity]` 和 `key = ...` 两行
    #[serde(default)]
    pub keyring_only: bool,
}

// ========== 响应体 ==========

/// POST /cluster/user 的结果
#[derive(Debug, Clone, Default, Serialize)]
pub struct ApplyUserResponse {
    pub user_entity: String,
    pub fs_name: String,
    pub subvol_name: String,
    pub group_name: Option<String>,
    pub source_cluster: Option<String>,
    pub created_on_source: bool,
    pub updated_on_source: bool,
    pub imported_to: Vec<String>,
    /// 每个集群实际下发的 caps
    pub caps_applied: BTreeMap<String, Vec<Capability>>,
    /// 每个集群解析出的子卷路径
    pub paths: BTreeMap<String, String>,
    pub errors: BTreeMap<String, String>,
}

/// 跨集群更新/删除的结果
#[derive(Debug, Clone, Default, Serialize)]
pub struct ClusterOutcome {
    pub user_entity: String,
    /// cluster -> "updated" / "deleted" / "not found" / 错误信息
    pub clusters: BTreeMap<String, String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn vars() -> TemplateVars<'static> {
        TemplateVars {
            fs: "CEPH-FS-01",
            path: "/volumes/fabric_staff/project123/abcd",
            group: "fabric_staff",
            subvol: "project123",
        }
    }

    #[test]
    fn test_render_cap() {
        assert_eq!(
            render_cap("allow rw fsname={fs} path={path}", &vars()).unwrap(),
            "allow rw fsname=CEPH-FS-01 path=/volumes/fabric_staff/project123/abcd"
        );
        assert_eq!(render_cap("allow r", &vars()).unwrap(), "allow r");
        assert_eq!(render_cap("{{literal}} {subvol}", &vars()).unwrap(), "{literal} project123");
    }

    #[test]
    fn test_render_cap_errors() {
        assert_eq!(
            render_cap("allow rw pool={pool}", &vars()),
            Err(TemplateError::UnknownPlaceholder("pool".to_string()))
        );
        assert!(matches!(
            render_cap("allow {fs", &vars()),
            Err(TemplateError::Unbalanced(_))
        ));
        assert!(matches!(
            render_cap("allow fs}", &vars()),
            Err(TemplateError::Unbalanced(_))
        ));
    }

    #[test]
    fn test_render_caps_keeps_entities() {
        let templates = vec![
            Capability::new("mon", "allow r"),
            Capability::new("osd", "allow rw tag cephfs data={fs}"),
        ];
        let rendered = render_caps(&templates, &vars()).unwrap();
        assert_eq!(rendered[0], Capability::new("mon", "allow r"));
        assert_eq!(
            rendered[1],
            Capability::new("osd", "allow rw tag cephfs data=CEPH-FS-01")
        );
    }

    #[test]
    fn test_validate_entity() {
        assert!(validate_entity("client.demo").is_ok());
        assert!(validate_entity("client.alice_0123456789").is_ok());
        assert!(validate_entity("client.a.b-c@d").is_ok());
        assert!(validate_entity("demo").is_err());
        assert!(validate_entity(".demo").is_err());
        assert!(validate_entity("client.").is_err());
        assert!(validate_entity("client.x; rm -rf /").is_err());
        assert!(validate_entity("client.$(id)").is_err());
    }

    #[test]
    fn test_ceph_user_from_dashboard() {
        let raw = json!({
            "entity": "client.demo",
            "caps": {"mon": "allow r", "mds": "allow rw"},
            "key": "AQD..."
        });
        let user = CephUser::from_dashboard(&raw, "europe").unwrap();
        assert_eq!(user.user_entity, "client.demo");
        assert_eq!(user.capabilities.len(), 2);
        assert!(user.keys.is_empty());
        assert_eq!(user.cluster.as_deref(), Some("europe"));

        let listed = json!({
            "user_entity": "client.x",
            "capabilities": [{"entity": "osd", "cap": "allow r"}]
        });
        let user = CephUser::from_dashboard(&listed, "lab").unwrap();
        assert_eq!(user.capabilities, vec![Capability::new("osd", "allow r")]);

        assert!(CephUser::from_dashboard(&json!({"caps": {}}), "lab").is_none());
    }

    #[test]
    fn test_templated_request_defaults() {
        let req: CreateUserTemplatedRequest = serde_json::from_value(json!({
            "user_entity": "client.project123",
            "template_capabilities": [{"entity": "mds", "cap": "allow rw path={path}"}],
            "render": {"fs_name": "CEPH-FS-01", "subvol_name": "project123"}
        }))
        .unwrap();
        assert!(req.sync_across_clusters);
        assert!(req.preferred_source.is_none());
        assert!(req.render.unwrap().group_name.is_none());
    }
}
