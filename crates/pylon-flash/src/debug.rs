//! Interactive debug sessions
//!
//! A session is a background `JLinkGDBServer` plus an interactive client in
//! the foreground: `JLinkRTTClient` for the RTT console, or
//! `arm-none-eabi-gdb` attached to the server. The server is started on
//! allocated local ports and polled until it accepts connections before the
//! client is launched.
//!
//! Servers run in their own process group, so a Ctrl-C typed into the
//! client only reaches the client.

use std::net::{Ipv4Addr, SocketAddr, TcpStream};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use pylon_core::device::DeviceHandle;
use signal_hook::consts::signal;

use crate::error::{Error, Result};
use crate::jlink::{JLink, JLinkConfig};
use crate::ports::PortAllocator;
use crate::probe::{CommandScript, ProbeCommand};
use crate::tools::ARM_GDB;

/// SEGGER GDB server
pub const GDB_SERVER: &str = "JLinkGDBServer";

/// SEGGER RTT telnet client
pub const RTT_CLIENT: &str = "JLinkRTTClient";

/// Default time a server gets to start listening
pub const DEFAULT_READY_TIMEOUT: Duration = Duration::from_secs(10);

const POLL_INTERVAL: Duration = Duration::from_millis(100);
const CONNECT_TIMEOUT: Duration = Duration::from_millis(250);

/// Executables started for debug sessions
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DebugTools {
    /// GDB server
    pub gdb_server: PathBuf,
    /// RTT console client
    pub rtt_client: PathBuf,
    /// GDB client
    pub gdb: PathBuf,
}

impl Default for DebugTools {
    fn default() -> Self {
        Self {
            gdb_server: PathBuf::from(GDB_SERVER),
            rtt_client: PathBuf::from(RTT_CLIENT),
            gdb: PathBuf::from(ARM_GDB.program),
        }
    }
}

/// A background server process, killed when dropped
#[derive(Debug)]
pub struct BackgroundServer {
    tool: String,
    child: Child,
}

impl BackgroundServer {
    fn spawn(mut cmd: Command) -> Result<Self> {
        let tool = program_name(&cmd);
        log::debug!("Starting {:?}", cmd);

        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            cmd.process_group(0);
        }

        let child = cmd
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .spawn()
            .map_err(|source| Error::Spawn {
                tool: tool.clone(),
                source,
            })?;
        Ok(Self { tool, child })
    }

    /// Process id of the server
    pub fn id(&self) -> u32 {
        self.child.id()
    }

    /// Fail if the server has already exited
    fn ensure_running(&mut self) -> Result<()> {
        match self.child.try_wait()? {
            Some(status) => Err(Error::UnexpectedExit {
                tool: self.tool.clone(),
                status: status.to_string(),
            }),
            None => Ok(()),
        }
    }
}

impl Drop for BackgroundServer {
    fn drop(&mut self) {
        if let Ok(None) = self.child.try_wait() {
            log::debug!("Stopping {} (pid {})", self.tool, self.child.id());
            let _ = self.child.kill();
        }
        let _ = self.child.wait();
    }
}

/// A running debug session
///
/// Owns the background server, if it started one; dropping the session
/// stops the server and any client still running.
#[derive(Debug)]
pub struct DebugSession {
    serial: String,
    gdb_port: u16,
    rtt_port: Option<u16>,
    server: Option<BackgroundServer>,
    client: Child,
}

impl DebugSession {
    /// Serial number of the probe in use
    pub fn serial(&self) -> &str {
        &self.serial
    }

    /// Port the GDB server listens on
    pub fn gdb_port(&self) -> u16 {
        self.gdb_port
    }

    /// RTT telnet port, for RTT sessions
    pub fn rtt_port(&self) -> Option<u16> {
        self.rtt_port
    }

    /// Whether this session started the GDB server itself
    pub fn owns_server(&self) -> bool {
        self.server.is_some()
    }

    /// Block until the interactive client exits
    ///
    /// Ctrl-C is left to the client while waiting; this process ignores
    /// it so the server is still shut down afterwards.
    pub fn wait(&mut self) -> Result<ExitStatus> {
        let interrupted = Arc::new(AtomicBool::new(false));
        let sig_id = signal_hook::flag::register(signal::SIGINT, interrupted.clone())?;

        let status = self.client.wait();

        signal_hook::low_level::unregister(sig_id);
        let status = status?;
        log::debug!("Client exited with {}", status);
        Ok(status)
    }
}

impl Drop for DebugSession {
    fn drop(&mut self) {
        if let Ok(None) = self.client.try_wait() {
            let _ = self.client.kill();
            let _ = self.client.wait();
        }
    }
}

/// Starts GDB server and client processes for attached probes
pub struct DebugSessionManager<'a> {
    jlink: &'a JLink,
    tools: DebugTools,
    ports: PortAllocator,
    ready_timeout: Duration,
}

impl<'a> DebugSessionManager<'a> {
    /// Manager starting servers with `jlink`'s target settings
    pub fn new(jlink: &'a JLink) -> Self {
        Self {
            jlink,
            tools: DebugTools::default(),
            ports: PortAllocator::new(),
            ready_timeout: DEFAULT_READY_TIMEOUT,
        }
    }

    /// Set how long a server may take to start listening
    pub fn with_ready_timeout(mut self, timeout: Duration) -> Self {
        self.ready_timeout = timeout;
        self
    }

    /// Use other server and client executables
    pub fn with_tools(mut self, tools: DebugTools) -> Self {
        self.tools = tools;
        self
    }

    /// Open the RTT console of `device`
    ///
    /// With `reset_board`, the target is reset once the server is up so no
    /// early output is missed.
    pub fn start_rtt(&mut self, device: &DeviceHandle, reset_board: bool) -> Result<DebugSession> {
        // Released right before the server binds the ports
        let ports = self.ports.reserve(2)?.release();
        let (gdb_port, rtt_port) = match ports[..] {
            [gdb, rtt] => (gdb, rtt),
            _ => {
                return Err(Error::PortAllocationFailure(std::io::Error::new(
                    std::io::ErrorKind::AddrNotAvailable,
                    "expected two ports",
                )))
            }
        };

        let mut server = BackgroundServer::spawn(gdb_server_command(
            &self.tools.gdb_server,
            self.jlink.config(),
            &device.serial,
            gdb_port,
            Some(rtt_port),
        ))?;
        wait_for_listener(gdb_port, self.ready_timeout, Some(&mut server))?;
        log::info!(
            "GDB server running for J-Link {} (GDB port {}, RTT port {})",
            device.serial,
            gdb_port,
            rtt_port
        );

        if reset_board {
            log::info!("Resetting board");
            self.jlink.run_script_file(
                &device.serial,
                &CommandScript::new([ProbeCommand::Reset, ProbeCommand::Go]),
            )?;
        }

        let client = spawn_client(rtt_client_command(&self.tools.rtt_client, rtt_port))?;
        Ok(DebugSession {
            serial: device.serial.clone(),
            gdb_port,
            rtt_port: Some(rtt_port),
            server: Some(server),
            client,
        })
    }

    /// Attach GDB to `device`
    ///
    /// With `port`, GDB connects straight to a server the user runs there
    /// and reports itself if nothing is listening. Otherwise a server is
    /// started on a free port and GDB is launched once it accepts
    /// connections.
    pub fn start_gdb(
        &mut self,
        device: &DeviceHandle,
        port: Option<u16>,
        elf: Option<&Path>,
    ) -> Result<DebugSession> {
        let (gdb_port, server) = match port {
            Some(port) => {
                log::info!("Using the GDB server on port {}", port);
                (port, None)
            }
            None => {
                let port = self.ports.allocate_one()?;
                let mut server = BackgroundServer::spawn(gdb_server_command(
                    &self.tools.gdb_server,
                    self.jlink.config(),
                    &device.serial,
                    port,
                    None,
                ))?;
                wait_for_listener(port, self.ready_timeout, Some(&mut server))?;
                (port, Some(server))
            }
        };

        let client = spawn_client(gdb_command(&self.tools.gdb, gdb_port, elf))?;
        Ok(DebugSession {
            serial: device.serial.clone(),
            gdb_port,
            rtt_port: None,
            server,
            client,
        })
    }
}

/// Poll `127.0.0.1:<port>` until something accepts a connection
///
/// Gives up early if `server` exits, and with [`Error::ServerNotReady`] once
/// `timeout` has passed.
pub fn wait_for_listener(
    port: u16,
    timeout: Duration,
    mut server: Option<&mut BackgroundServer>,
) -> Result<()> {
    let addr = SocketAddr::from((Ipv4Addr::LOCALHOST, port));
    let start = Instant::now();

    loop {
        if TcpStream::connect_timeout(&addr, CONNECT_TIMEOUT).is_ok() {
            log::debug!("Port {} ready after {:?}", port, start.elapsed());
            return Ok(());
        }
        if let Some(server) = server.as_deref_mut() {
            server.ensure_running()?;
        }
        if start.elapsed() >= timeout {
            return Err(Error::ServerNotReady {
                port,
                waited: start.elapsed(),
            });
        }
        thread::sleep(POLL_INTERVAL);
    }
}

fn spawn_client(mut cmd: Command) -> Result<Child> {
    log::debug!("Starting {:?}", cmd);
    cmd.spawn().map_err(|source| Error::Spawn {
        tool: program_name(&cmd),
        source,
    })
}

fn program_name(cmd: &Command) -> String {
    cmd.get_program().to_string_lossy().into_owned()
}

fn gdb_server_command(
    program: &Path,
    config: &JLinkConfig,
    serial: &str,
    gdb_port: u16,
    rtt_port: Option<u16>,
) -> Command {
    let mut cmd = Command::new(program);
    cmd.args(config.target_args())
        .arg("-select")
        .arg(format!("usb={}", serial))
        .arg("-port")
        .arg(gdb_port.to_string());
    if let Some(rtt_port) = rtt_port {
        cmd.arg("-RTTTelnetPort").arg(rtt_port.to_string());
    }
    cmd
}

fn rtt_client_command(program: &Path, rtt_port: u16) -> Command {
    let mut cmd = Command::new(program);
    cmd.args(["-LocalEcho", "Off", "-RTTTelnetPort"])
        .arg(rtt_port.to_string());
    cmd
}

fn gdb_command(program: &Path, port: u16, elf: Option<&Path>) -> Command {
    let mut cmd = Command::new(program);
    if let Some(elf) = elf {
        cmd.arg(elf);
    }
    cmd.arg("-ex")
        .arg(format!("target remote localhost:{}", port));
    cmd
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::ffi::OsStr;
    use std::net::TcpListener;

    fn args(cmd: &Command) -> Vec<&str> {
        cmd.get_args().map(|a| a.to_str().unwrap()).collect()
    }

    #[test]
    fn test_gdb_server_args() {
        let config = JLinkConfig::default();
        let tools = DebugTools::default();
        let cmd = gdb_server_command(&tools.gdb_server, &config, "683512372", 2331, Some(19021));
        assert_eq!(cmd.get_program(), OsStr::new(GDB_SERVER));
        assert_eq!(
            args(&cmd),
            [
                "-device",
                "nRF52",
                "-speed",
                "4000",
                "-if",
                "SWD",
                "-select",
                "usb=683512372",
                "-port",
                "2331",
                "-RTTTelnetPort",
                "19021"
            ]
        );

        let cmd = gdb_server_command(&tools.gdb_server, &config, "1", 2331, None);
        assert!(!args(&cmd).contains(&"-RTTTelnetPort"));
    }

    #[test]
    fn test_client_args() {
        let tools = DebugTools::default();
        assert_eq!(
            args(&rtt_client_command(&tools.rtt_client, 19021)),
            ["-LocalEcho", "Off", "-RTTTelnetPort", "19021"]
        );

        let cmd = gdb_command(&tools.gdb, 2331, Some(Path::new("app.elf")));
        assert_eq!(cmd.get_program(), OsStr::new("arm-none-eabi-gdb"));
        assert_eq!(args(&cmd), ["app.elf", "-ex", "target remote localhost:2331"]);
        assert_eq!(
            args(&gdb_command(&tools.gdb, 2331, None)),
            ["-ex", "target remote localhost:2331"]
        );
    }

    #[test]
    fn test_wait_for_listener_ready() {
        let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).unwrap();
        let port = listener.local_addr().unwrap().port();
        assert!(wait_for_listener(port, Duration::from_secs(2), None).is_ok());
    }

    #[test]
    fn test_wait_for_listener_times_out() {
        let port = PortAllocator::new().allocate_one().unwrap();
        let timeout = Duration::from_millis(300);

        match wait_for_listener(port, timeout, None) {
            Err(Error::ServerNotReady { port: p, waited }) => {
                assert_eq!(p, port);
                assert!(waited >= timeout);
            }
            other => panic!("expected ServerNotReady, got {:?}", other),
        }
    }

    #[cfg(unix)]
    #[test]
    fn test_wait_for_listener_server_exits() {
        let port = PortAllocator::new().allocate_one().unwrap();
        let mut cmd = Command::new("sh");
        cmd.args(["-c", "exit 3"]);
        let mut server = BackgroundServer::spawn(cmd).unwrap();

        // Let it exit before polling
        let _ = server.child.wait();
        assert!(matches!(
            wait_for_listener(port, Duration::from_secs(5), Some(&mut server)),
            Err(Error::UnexpectedExit { .. })
        ));
    }

    /// Process group id from `/proc/<pid>/stat`
    #[cfg(target_os = "linux")]
    fn process_group(pid: &str) -> u32 {
        let stat = std::fs::read_to_string(format!("/proc/{}/stat", pid)).unwrap();
        // pid (comm) state ppid pgrp ...
        let fields: Vec<&str> = stat[stat.rfind(')').unwrap() + 1..]
            .split_whitespace()
            .collect();
        fields[2].parse().unwrap()
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_server_leads_own_process_group() {
        let mut cmd = Command::new("sleep");
        cmd.arg("30");
        let server = BackgroundServer::spawn(cmd).unwrap();

        let pid = server.id();
        assert_eq!(process_group(&pid.to_string()), pid);
        assert_ne!(process_group("self"), pid);
    }

    #[cfg(unix)]
    mod fake {
        use super::*;
        use crate::fake_tool;

        fn manager<'a>(jlink: &'a JLink, tools: DebugTools) -> DebugSessionManager<'a> {
            DebugSessionManager::new(jlink).with_tools(tools)
        }

        fn tools(dir: &tempfile::TempDir, server: &str) -> DebugTools {
            DebugTools {
                gdb_server: fake_tool::script(dir.path(), "JLinkGDBServer", server),
                rtt_client: fake_tool::script(dir.path(), "JLinkRTTClient", "exit 0\n"),
                gdb: fake_tool::script(dir.path(), "gdb", "echo \"$@\" > \"$0.args\"\n"),
            }
        }

        #[test]
        fn test_gdb_on_given_port_skips_server() {
            let dir = tempfile::tempdir().unwrap();
            // Leaves a marker if it is ever started
            let tools = tools(&dir, "touch \"$0.started\"\n");
            let gdb = tools.gdb.clone();
            let server = tools.gdb_server.clone();
            let jlink = JLink::default();
            let device = DeviceHandle::new("683512372");

            // Nothing listens here; GDB reports that itself
            let port = PortAllocator::new().allocate_one().unwrap();
            let mut session = manager(&jlink, tools)
                .with_ready_timeout(Duration::from_millis(100))
                .start_gdb(&device, Some(port), None)
                .unwrap();

            assert!(!session.owns_server());
            assert_eq!(session.gdb_port(), port);
            assert!(session.wait().unwrap().success());

            let args = std::fs::read_to_string(gdb.with_extension("args")).unwrap();
            assert_eq!(args.trim(), format!("-ex target remote localhost:{}", port));
            assert!(!server.with_extension("started").exists());
        }

        #[test]
        fn test_server_exit_reported() {
            let dir = tempfile::tempdir().unwrap();
            let jlink = JLink::default();
            let device = DeviceHandle::new("683512372");

            let result = manager(&jlink, tools(&dir, "exit 1\n")).start_rtt(&device, false);
            match result {
                Err(Error::UnexpectedExit { tool, .. }) => {
                    assert!(tool.ends_with("JLinkGDBServer"))
                }
                other => panic!("expected UnexpectedExit, got {:?}", other),
            }

            let result = manager(&jlink, tools(&dir, "exit 1\n")).start_gdb(&device, None, None);
            assert!(matches!(result, Err(Error::UnexpectedExit { .. })));
        }

        #[test]
        fn test_silent_server_not_ready() {
            let dir = tempfile::tempdir().unwrap();
            let jlink = JLink::default();
            let device = DeviceHandle::new("683512372");

            let result = manager(&jlink, tools(&dir, "exec sleep 30\n"))
                .with_ready_timeout(Duration::from_millis(300))
                .start_rtt(&device, false);
            assert!(matches!(result, Err(Error::ServerNotReady { .. })));
        }
    }
}
