//! Share access verification.
//!
//! For an endpoint and a credential, [`verify_access`] performs the smallest
//! round trip that proves a share is usable: list, write a probe file, see it
//! listed, read it back, remove it. [`verify_endpoint`] runs that once per
//! credential concurrently; one failing credential never short-circuits the
//! others. Each attempt is bounded by its own timeout, and running out of time
//! counts as a connection failure.
//!
//! The protocol work is delegated to a [`ShareClient`]. [`SmbClientCli`]
//! drives the `smbclient` binary, optionally through a command prefix such as
//! `kubectl exec -i -n <ns> <pod> --` so the client runs inside the cluster.

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::join_all;
use rand::Rng;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, info};

#[cfg(test)]
use mockall::automock;

use crate::endpoint::EndpointKind;
use crate::error::AccessFailure;
use crate::report::{run_check, CheckResult};
use crate::{Error, Result};

/// Payload written to the probe file
const PROBE_PAYLOAD: &[u8] = b"smbshare-e2e access probe\n";

/// Username/password pair for a share
#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    /// Username, optionally `DOMAIN\user`
    pub username: String,
    /// Password
    pub password: String,
}

impl Credential {
    /// Create a credential
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credential")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Host and share name to connect to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShareTarget {
    /// Resolved host (IP or DNS name)
    pub host: String,
    /// SMB share name, e.g. `My Share`
    pub share_name: String,
}

impl ShareTarget {
    /// Create a target
    pub fn new(host: impl Into<String>, share_name: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            share_name: share_name.into(),
        }
    }

    /// UNC form, `//host/share`
    pub fn unc(&self) -> String {
        format!("//{}/{}", self.host, self.share_name)
    }
}

/// File operations against a share
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ShareClient: Send + Sync {
    /// List entry names in the share root
    async fn list(&self, target: &ShareTarget, credential: &Credential) -> Result<Vec<String>>;

    /// Write `contents` to `name` in the share root
    async fn put(
        &self,
        target: &ShareTarget,
        credential: &Credential,
        name: &str,
        contents: &[u8],
    ) -> Result<()>;

    /// Read `name` from the share root
    async fn get(&self, target: &ShareTarget, credential: &Credential, name: &str)
        -> Result<Vec<u8>>;

    /// Delete `name` from the share root
    async fn remove(&self, target: &ShareTarget, credential: &Credential, name: &str)
        -> Result<()>;
}

/// Check name for one endpoint/credential combination
pub fn access_check_name(kind: EndpointKind, credential: &Credential) -> String {
    format!("access[{}/{}]", kind, credential.username)
}

/// Round trip against one target with one credential, bounded by `timeout`
pub async fn verify_access<C>(
    client: &C,
    target: &ShareTarget,
    credential: &Credential,
    timeout: Duration,
) -> Result<()>
where
    C: ShareClient + ?Sized,
{
    match tokio::time::timeout(timeout, round_trip(client, target, credential)).await {
        Ok(result) => result,
        Err(_) => Err(Error::access(
            AccessFailure::Connection,
            target.unc(),
            format!("no response within {:?}", timeout),
        )),
    }
}

async fn round_trip<C>(client: &C, target: &ShareTarget, credential: &Credential) -> Result<()>
where
    C: ShareClient + ?Sized,
{
    let probe = probe_file_name();
    debug!(share = %target.unc(), user = %credential.username, probe = %probe, "starting access round trip");

    client.list(target, credential).await?;
    client.put(target, credential, &probe, PROBE_PAYLOAD).await?;

    if let Err(e) = verify_written_file(client, target, credential, &probe).await {
        if let Err(cleanup) = client.remove(target, credential, &probe).await {
            debug!(share = %target.unc(), probe = %probe, error = %cleanup, "cleanup of written file failed");
        }
        return Err(e);
    }

    client.remove(target, credential, &probe).await?;
    info!(share = %target.unc(), user = %credential.username, "share access verified");
    Ok(())
}

/// The written file is listed and reads back what was written
async fn verify_written_file<C>(
    client: &C,
    target: &ShareTarget,
    credential: &Credential,
    probe: &str,
) -> Result<()>
where
    C: ShareClient + ?Sized,
{
    let entries = client.list(target, credential).await?;
    if !entries.iter().any(|e| e == probe) {
        return Err(Error::access(
            AccessFailure::Operation,
            target.unc(),
            format!("{} missing from listing after put", probe),
        ));
    }

    let contents = client.get(target, credential, probe).await?;
    if !contains(&contents, PROBE_PAYLOAD) {
        return Err(Error::access(
            AccessFailure::Operation,
            target.unc(),
            format!("{} read back {} bytes that differ from what was written", probe, contents.len()),
        ));
    }
    Ok(())
}

/// Verify every credential against one endpoint concurrently
pub async fn verify_endpoint<C>(
    client: &C,
    kind: EndpointKind,
    target: &ShareTarget,
    credentials: &[Credential],
    timeout: Duration,
) -> Vec<CheckResult>
where
    C: ShareClient + ?Sized,
{
    join_all(credentials.iter().map(|credential| {
        run_check(
            access_check_name(kind, credential),
            verify_access(client, target, credential, timeout),
        )
    }))
    .await
}

fn probe_file_name() -> String {
    let suffix: u32 = rand::thread_rng().gen();
    format!("e2e-probe-{:08x}.txt", suffix)
}

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    haystack.windows(needle.len()).any(|w| w == needle)
}

/// Status codes meaning the share could not be reached at all
const CONNECTION_STATUSES: &[&str] = &[
    "NT_STATUS_CONNECTION_REFUSED",
    "NT_STATUS_HOST_UNREACHABLE",
    "NT_STATUS_NETWORK_UNREACHABLE",
    "NT_STATUS_IO_TIMEOUT",
    "NT_STATUS_UNSUCCESSFUL",
    "NT_STATUS_BAD_NETWORK_NAME",
    "NT_STATUS_RESOURCE_NAME_NOT_FOUND",
    "NT_STATUS_CONNECTION_RESET",
    "NT_STATUS_CONNECTION_DISCONNECTED",
];

/// Status codes meaning the credential was rejected
const AUTH_STATUSES: &[&str] = &[
    "NT_STATUS_LOGON_FAILURE",
    "NT_STATUS_WRONG_PASSWORD",
    "NT_STATUS_NO_SUCH_USER",
    "NT_STATUS_ACCOUNT_DISABLED",
    "NT_STATUS_ACCOUNT_LOCKED_OUT",
    "NT_STATUS_PASSWORD_EXPIRED",
];

/// Classify `smbclient` output into an access failure kind.
///
/// `None` means the output reports no failure.
pub fn classify_smbclient_output(output: &str) -> Option<AccessFailure> {
    if CONNECTION_STATUSES.iter().any(|s| output.contains(s))
        || output.contains("Connection to")
        || output.contains("failed (Error NT_STATUS")
    {
        return Some(AccessFailure::Connection);
    }
    if AUTH_STATUSES.iter().any(|s| output.contains(s)) {
        return Some(AccessFailure::Auth);
    }
    if output.contains("NT_STATUS_") && !output.contains("NT_STATUS_OK") {
        return Some(AccessFailure::Operation);
    }
    None
}

/// Entry names from `smbclient ls` output, without `.` and `..`
pub fn parse_ls_output(output: &str) -> Vec<String> {
    output
        .lines()
        .filter(|line| line.starts_with("  ") && !line.contains("blocks of size"))
        .filter_map(|line| {
            let name = line.trim_start().split("  ").next()?.trim_end();
            (!name.is_empty() && name != "." && name != "..").then(|| name.to_string())
        })
        .collect()
}

/// Moves the first stdin line into `PASSWD` and execs `$0` with the rest of
/// stdin. smbclient reads `PASSWD` when `-U` carries no password, so the
/// secret never appears in an argv, locally or behind `kubectl exec`.
const PASSWORD_FROM_STDIN: &str = r#"IFS= read -r PASSWD && export PASSWD && exec "$0" "$@""#;

/// [`ShareClient`] running the `smbclient` binary
#[derive(Debug, Clone)]
pub struct SmbClientCli {
    /// Command and arguments placed before `smbclient` (e.g. a `kubectl exec`)
    prefix: Vec<String>,
    /// Name or path of the smbclient binary
    program: String,
}

impl Default for SmbClientCli {
    fn default() -> Self {
        Self {
            prefix: Vec::new(),
            program: "smbclient".to_string(),
        }
    }
}

impl SmbClientCli {
    /// Run smbclient through a command prefix
    pub fn with_prefix(prefix: Vec<String>) -> Self {
        Self {
            prefix,
            ..Default::default()
        }
    }

    /// Full argv for one `-c` command; the password goes over stdin
    pub fn argv(&self, target: &ShareTarget, credential: &Credential, command: &str) -> Vec<String> {
        let mut argv = self.prefix.clone();
        argv.extend([
            "sh".to_string(),
            "-c".to_string(),
            PASSWORD_FROM_STDIN.to_string(),
            self.program.clone(),
            target.unc(),
            "-U".to_string(),
            credential.username.clone(),
            "-c".to_string(),
            command.to_string(),
        ]);
        argv
    }

    /// Bytes written to the child's stdin: password line, then `data`
    pub fn stdin_payload(credential: &Credential, data: Option<&[u8]>) -> Vec<u8> {
        let mut payload = Vec::with_capacity(credential.password.len() + 1 + data.map_or(0, <[u8]>::len));
        payload.extend_from_slice(credential.password.as_bytes());
        payload.push(b'\n');
        if let Some(data) = data {
            payload.extend_from_slice(data);
        }
        payload
    }

    async fn run(
        &self,
        target: &ShareTarget,
        credential: &Credential,
        command: &str,
        stdin: Option<&[u8]>,
    ) -> Result<Vec<u8>> {
        let argv = self.argv(target, credential, command);
        let (program, args) = argv
            .split_first()
            .ok_or_else(|| Error::internal_with_context("smbclient", "empty command line"))?;
        debug!(share = %target.unc(), user = %credential.username, command, "running smbclient");

        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                Error::internal_with_context("smbclient", format!("failed to spawn {}: {}", program, e))
            })?;

        if let Some(mut pipe) = child.stdin.take() {
            let written = match pipe.write_all(&Self::stdin_payload(credential, stdin)).await {
                Ok(()) => pipe.shutdown().await,
                Err(e) => Err(e),
            };
            // A client that fails to connect exits before reading stdin; its output says why.
            if let Err(e) = written {
                debug!(share = %target.unc(), error = %e, "smbclient closed stdin early");
            }
        }

        let output = child.wait_with_output().await?;
        let stderr = String::from_utf8_lossy(&output.stderr);
        let text = format!("{}{}", String::from_utf8_lossy(&output.stdout), stderr);
        let classified = classify_smbclient_output(&text);
        match (output.status.success(), classified) {
            (true, None) => Ok(output.stdout),
            (_, Some(kind)) => Err(Error::access(kind, target.unc(), text.trim().to_string())),
            (false, None) => Err(Error::access(
                AccessFailure::Operation,
                target.unc(),
                format!("smbclient exited with {}: {}", output.status, stderr.trim()),
            )),
        }
    }
}

#[async_trait]
impl ShareClient for SmbClientCli {
    async fn list(&self, target: &ShareTarget, credential: &Credential) -> Result<Vec<String>> {
        let out = self.run(target, credential, "ls", None).await?;
        Ok(parse_ls_output(&String::from_utf8_lossy(&out)))
    }

    async fn put(
        &self,
        target: &ShareTarget,
        credential: &Credential,
        name: &str,
        contents: &[u8],
    ) -> Result<()> {
        self.run(target, credential, &format!("put - \"{}\"", name), Some(contents))
            .await
            .map(|_| ())
    }

    async fn get(
        &self,
        target: &ShareTarget,
        credential: &Credential,
        name: &str,
    ) -> Result<Vec<u8>> {
        self.run(target, credential, &format!("get \"{}\" -", name), None)
            .await
    }

    async fn remove(
        &self,
        target: &ShareTarget,
        credential: &Credential,
        name: &str,
    ) -> Result<()> {
        self.run(target, credential, &format!("del \"{}\"", name), None)
            .await
            .map(|_| ())
    }
}
