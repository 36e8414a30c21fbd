//! SSH 客户端
//!
//! Dashboard 无法导入带有既定密钥的 keyring，
//! 这一步通过 SSH 在集群管理主机上执行 `ceph auth import` 完成

use async_trait::async_trait;
use reqwest::Url;
use russh::client::{self, Handle};
use russh::{ChannelMsg, Disconnect};
use russh_keys::key;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::env::{env_prefix, process_env, EnvLookup};
use crate::config::{constants, ClusterEntry};

/// SSH 错误
#[derive(Debug, thiserror::Error)]
pub enum SshError {
    #[error("ssh connection to {host}:{port} timed out")]
    Timeout { host: String, port: u16 },
    #[error("ssh error: {0}")]
    Ssh(#[from] russh::Error),
    #[error("failed to load SSH key {path}: {source}")]
    Key {
        path: String,
        #[source]
        source: russh_keys::Error,
    },
    #[error("ssh authentication failed for {user}@{host}")]
    AuthFailed { user: String, host: String },
    #[error("remote command `{command}` failed with exit status {status}: {stderr}")]
    CommandFailed {
        command: String,
        status: String,
        stderr: String,
    },
}

/// SSH 连接参数
///
/// 优先级：环境变量 `<CLUSTER>_SSH_*` > 配置文件 `ssh` 段 > 默认值
#[derive(Clone)]
pub struct SshCreds {
    pub host: String,
    pub port: u16,
    pub user: String,
    /// 设置了密码时为 None
    pub key_path: Option<PathBuf>,
    pub password: Option<String>,
}

impl fmt::Debug for SshCreds {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SshCreds")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("key_path", &self.key_path)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .finish()
    }
}

impl SshCreds {
    pub fn for_cluster(entry: &ClusterEntry) -> Self {
        Self::for_cluster_with_env(entry, &process_env)
    }

    pub fn for_cluster_with_env(entry: &ClusterEntry, lookup: EnvLookup<'_>) -> Self {
        let prefix = env_prefix(&entry.name);
        let var = |suffix: &str| lookup(&format!("{}_SSH_{}", prefix, suffix));

        // 默认使用 Dashboard 所在主机
        let dashboard_host = Url::parse(entry.dashboard.primary_endpoint())
            .ok()
            .and_then(|u| u.host_str().map(str::to_string))
            .unwrap_or_else(|| "localhost".to_string());

        let host = var("HOST")
            .or_else(|| entry.ssh.host.clone())
            .unwrap_or(dashboard_host);

        let port = var("PORT")
            .and_then(|p| p.parse().ok())
            .or(entry.ssh.port)
            .unwrap_or(22);

        let user = var("USER")
            .or_else(|| entry.ssh.user.clone())
            .unwrap_or_else(|| "root".to_string());

        let password = var("PASSWORD");
        let key_path = match password {
            Some(_) => None,
            None => Some(expand_home(
                &var("KEY")
                    .or_else(|| entry.ssh.key.clone())
                    .unwrap_or_else(|| "~/.ssh/id_rsa".to_string()),
            )),
        };

        Self {
            host,
            port,
            user,
            key_path,
            password,
        }
    }
}

fn expand_home(path: &str) -> PathBuf {
    match (path.strip_prefix("~/"), dirs::home_dir()) {
        (Some(rest), Some(home)) => home.join(rest),
        _ => PathBuf::from(path),
    }
}

/// 远端命令输出
#[derive(Debug, Default)]
pub struct CommandOutput {
    pub exit_status: Option<u32>,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_status == Some(0)
    }

    pub fn stderr_lossy(&self) -> String {
        String::from_utf8_lossy(&self.stderr).trim().to_string()
    }
}

/// russh 客户端回调
struct ClientHandler {
    host: String,
}

#[async_trait]
impl client::Handler for ClientHandler {
    type Error = russh::Error;

    async fn check_server_key(
        &mut self,
        server_public_key: &key::PublicKey,
    ) -> Result<bool, Self::Error> {
        // 集群管理主机在内网，接受任意主机密钥
        debug!(
            host = %self.host,
            fingerprint = %server_public_key.fingerprint(),
            "Accepting SSH host key"
        );
        Ok(true)
    }
}

/// 一条已认证的 SSH 连接
pub struct SshRunner {
    session: Handle<ClientHandler>,
    host: String,
}

impl SshRunner {
    /// 建立连接并认证（密码优先，否则使用私钥）
    pub async fn connect(creds: &SshCreds) -> Result<Self, SshError> {
        let config = Arc::new(client::Config {
            inactivity_timeout: Some(Duration::from_secs(120)),
            ..Default::default()
        });
        let handler = ClientHandler {
            host: creds.host.clone(),
        };

        let connect = client::connect(config, (creds.host.as_str(), creds.port), handler);
        let mut session = tokio::time::timeout(constants::SSH_CONNECT_TIMEOUT, connect)
            .await
            .map_err(|_| SshError::Timeout {
                host: creds.host.clone(),
                port: creds.port,
            })??;

        let authenticated = match (&creds.password, &creds.key_path) {
            (Some(password), _) => session.authenticate_password(&creds.user, password).await?,
            (None, Some(path)) => {
                let key_pair = russh_keys::load_secret_key(path, None).map_err(|source| {
                    SshError::Key {
                        path: path.display().to_string(),
                        source,
                    }
                })?;
                session
                    .authenticate_publickey(&creds.user, Arc::new(key_pair))
                    .await?
            }
            (None, None) => false,
        };

        if !authenticated {
            return Err(SshError::AuthFailed {
                user: creds.user.clone(),
                host: creds.host.clone(),
            });
        }

        debug!(host = %creds.host, port = creds.port, user = %creds.user, "SSH session established");
        Ok(Self {
            session,
            host: creds.host.clone(),
        })
    }

    /// 写入远端文件（权限 600）
    pub async fn put_bytes(&self, data: &[u8], remote_path: &str) -> Result<(), SshError> {
        let command = format!("umask 077 && cat > {}", remote_path);
        self.exec(&command, Some(data), true).await.map(|_| ())
    }

    /// 执行远端命令；`check` 为 true 时非零退出码视为错误
    pub async fn run(&self, command: &str, check: bool) -> Result<CommandOutput, SshError> {
        self.exec(command, None, check).await
    }

    async fn exec(
        &self,
        command: &str,
        stdin: Option<&[u8]>,
        check: bool,
    ) -> Result<CommandOutput, SshError> {
        let mut channel = self.session.channel_open_session().await?;
        channel.exec(true, command).await?;
        if let Some(data) = stdin {
            channel.data(data).await?;
        }
        channel.eof().await?;

        let mut output = CommandOutput::default();
        while let Some(msg) = channel.wait().await {
            match msg {
                ChannelMsg::Data { ref data } => output.stdout.extend_from_slice(&**data),
                ChannelMsg::ExtendedData { ref data, ext: 1 } => {
                    output.stderr.extend_from_slice(&**data)
                }
                ChannelMsg::ExitStatus { exit_status } => output.exit_status = Some(exit_status),
                _ => {}
            }
        }

        debug!(host = %self.host, command = %command, exit_status = ?output.exit_status, "Remote command finished");

        if check && !output.success() {
            return Err(SshError::CommandFailed {
                command: command.to_string(),
                status: output
                    .exit_status
                    .map_or_else(|| "unknown".to_string(), |s| s.to_string()),
                stderr: output.stderr_lossy(),
            });
        }
        Ok(output)
    }

    pub async fn close(self) {
        if let Err(e) = self
            .session
            .disconnect(Disconnect::ByApplication, "", "English")
            .await
        {
            debug!(host = %self.host, error = %e, "SSH disconnect failed");
        }
    }
}

/// keyring 导入接口
///
/// 生产环境通过 SSH 执行，测试中替换为记录调用的实现
#[async_trait]
pub trait KeyringImporter: Send + Sync {
    async fn import(
        &self,
        entry: &ClusterEntry,
        user_entity: &str,
        keyring: &str,
    ) -> Result<(), SshError>;
}

/// 通过 SSH 执行 `ceph auth import`
#[derive(Debug, Default, Clone)]
pub struct SshKeyringImporter;

#[async_trait]
impl KeyringImporter for SshKeyringImporter {
    async fn import(
        &self,
        entry: &ClusterEntry,
        user_entity: &str,
        keyring: &str,
    ) -> Result<(), SshError> {
        let creds = SshCreds::for_cluster(entry);
        let remote_tmp = remote_keyring_path(user_entity);

        let runner = SshRunner::connect(&creds).await?;
        let result = async {
            runner.put_bytes(keyring.as_bytes(), &remote_tmp).await?;
            runner
                .run(&format!("{} auth import -i {}", entry.ceph_cli, remote_tmp), true)
                .await?;
            Ok::<_, SshError>(())
        }
        .await;

        // 无论导入是否成功都清理临时文件
        if let Err(e) = runner.run(&format!("rm -f {}", remote_tmp), false).await {
            warn!(cluster = %entry.name, path = %remote_tmp, error = %e, "Failed to remove remote keyring");
        }
        runner.close().await;

        if result.is_ok() {
            info!(cluster = %entry.name, entity = %user_entity, host = %creds.host, "Imported keyring");
        }
        result
    }
}

/// 远端临时 keyring 路径：`/tmp/client_demo.keyring.<uuid>`
pub fn remote_keyring_path(user_entity: &str) -> String {
    format!(
        "/tmp/{}.keyring.{}",
        user_entity.replace('.', "_"),
        uuid::Uuid::new_v4().simple()
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SshSettings;
    use crate::infra::dashboard::fake;
    use std::collections::HashMap;

    fn no_env(_: &str) -> Option<String> {
        None
    }

    #[test]
    fn test_creds_defaults() {
        let entry = fake::entry("europe", vec!["https://10.145.126.2:8443".to_string()]);
        let creds = SshCreds::for_cluster_with_env(&entry, &no_env);

        assert_eq!(creds.host, "10.145.126.2");
        assert_eq!(creds.port, 22);
        assert_eq!(creds.user, "root");
        assert!(creds.password.is_none());
        assert!(creds.key_path.unwrap().ends_with(".ssh/id_rsa"));
    }

    #[test]
    fn test_creds_yaml_then_env() {
        let mut entry = fake::entry("lab-2", vec!["http://mgr:8080".to_string()]);
        entry.ssh = SshSettings {
            host: Some("admin-host".to_string()),
            port: Some(2222),
            user: Some("ceph".to_string()),
            key: Some("/etc/keys/id_ed25519".to_string()),
        };

        let creds = SshCreds::for_cluster_with_env(&entry, &no_env);
        assert_eq!(creds.host, "admin-host");
        assert_eq!(creds.port, 2222);
        assert_eq!(creds.user, "ceph");
        assert_eq!(creds.key_path, Some(PathBuf::from("/etc/keys/id_ed25519")));

        let env: HashMap<&str, &str> = HashMap::from([
            ("LAB_2_SSH_HOST", "env-host"),
            ("LAB_2_SSH_PORT", "2200"),
            ("LAB_2_SSH_PASSWORD", "pw"),
        ]);
        let lookup = |k: &str| env.get(k).map(|v| v.to_string());
        let creds = SshCreds::for_cluster_with_env(&entry, &lookup);
        assert_eq!(creds.host, "env-host");
        assert_eq!(creds.port, 2200);
        assert_eq!(creds.user, "ceph");
        assert_eq!(creds.password.as_deref(), Some("pw"));
        assert!(creds.key_path.is_none());
        assert!(!format!("{:?}", creds).contains("pw\""));
    }

    #[test]
    fn test_remote_keyring_path() {
        let a = remote_keyring_path("client.demo");
        let b = remote_keyring_path("client.demo");
        assert!(a.starts_with("/tmp/client_demo.keyring."));
        assert_ne!(a, b);
    }

    #[test]
    fn test_command_output() {
        let output = CommandOutput {
            exit_status: Some(0),
            stdout: Vec::new(),
            stderr: b" warn\n".to_vec(),
        };
        assert!(output.success());
        assert_eq!(output.stderr_lossy(), "warn");
        assert!(!CommandOutput::default().success());
    }

    #[tokio::test]
    async fn test_connect_unreachable_host() {
        let creds = SshCreds {
            host: "127.0.0.1".to_string(),
            port: 1,
            user: "root".to_string(),
            key_path: None,
            password: Some("x".to_string()),
        };
        assert!(SshRunner::connect(&creds).await.is_err());
    }
}
