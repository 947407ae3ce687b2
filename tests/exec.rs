// End-to-end coverage of the plain exec server (spec §8 scenarios #1 and
// #2, run against `sshexecd` rather than a forwarding round trip since
// that needs no real upstream host).

mod support;

use support::{free_port, Proc};

#[tokio::test]
async fn echoes_stdin_to_stdout() -> anyhow::Result<()> {
    let tmp_dir = tempfile::tempdir()?;
    let port = free_port()?;
    let mut proc = Proc::spawn("sshexecd", &[&port.to_string(), "127.0.0.1"], tmp_dir.path())?;
    proc.await_event("server-about-to-listen")?;

    // spec §8 scenario #1, run against the local-exec worker rather than
    // a real forwarding round trip: exec "cat", send "hello world\n",
    // close stdin, expect it echoed back verbatim with exit status 0.
    let result = support::sshclient::exec_with_input(port, "whoever", "cat", b"hello world\n").await?;
    assert_eq!(result.stdout, b"hello world\n");
    assert_eq!(result.exit_status, Some(0));
    Ok(())
}

#[tokio::test]
async fn exit_code_is_propagated() -> anyhow::Result<()> {
    let tmp_dir = tempfile::tempdir()?;
    let port = free_port()?;
    let mut proc = Proc::spawn("sshexecd", &[&port.to_string(), "127.0.0.1"], tmp_dir.path())?;
    proc.await_event("server-about-to-listen")?;

    let result = support::sshclient::exec(port, "whoever", "exit 5").await?;
    assert_eq!(result.exit_status, Some(5));
    Ok(())
}

#[tokio::test]
async fn stdout_is_delivered_verbatim() -> anyhow::Result<()> {
    let tmp_dir = tempfile::tempdir()?;
    let port = free_port()?;
    let mut proc = Proc::spawn("sshexecd", &[&port.to_string(), "127.0.0.1"], tmp_dir.path())?;
    proc.await_event("server-about-to-listen")?;

    let result = support::sshclient::exec(port, "whoever", "echo hello world").await?;
    assert_eq!(result.stdout, b"hello world\n");
    assert_eq!(result.exit_status, Some(0));
    Ok(())
}
