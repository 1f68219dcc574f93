use nix::errno::Errno;
use nix::poll::{poll, PollFd, PollFlags, PollTimeout};
use std::io::Result;
use std::os::fd::AsFd;
use std::time::Duration;

/// Wait until `fd` is readable or `timeout` passes.
///
/// Hangup and error conditions count as readable so the following read
/// reports them. Interrupted waits return `false`.
pub fn readable<F: AsFd>(fd: &F, timeout: Duration) -> Result<bool> {
    let ms = u16::try_from(timeout.as_millis()).unwrap_or(u16::MAX);
    let mut fds = [PollFd::new(fd.as_fd(), PollFlags::POLLIN)];

    match poll(&mut fds, PollTimeout::from(ms)) {
        Ok(0) => Ok(false),
        Ok(_) => Ok(fds[0].revents().map_or(false, |r| {
            r.intersects(PollFlags::POLLIN | PollFlags::POLLHUP | PollFlags::POLLERR)
        })),
        Err(Errno::EINTR) => Ok(false),
        Err(e) => Err(e.into()),
    }
}
