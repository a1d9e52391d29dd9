use std::ffi::CString;
use std::io::ErrorKind;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;

/// Name the calling thread for `ps`/`top`/coredumps. Best-effort; the
/// harness binary calls this from the poll loop thread so a hang is easy
/// to spot in a thread listing.
pub fn set_name(name: &str) {
    let cstr = CString::new(name).expect("thread name contains a NUL byte");

    unsafe {
        libc::pthread_setname_np(libc::pthread_self(), cstr.as_ptr());
    }
}

/// Ask the scheduler for `SCHED_FIFO` realtime priority. Requires
/// `CAP_SYS_NICE` or root; logs and continues on failure rather than
/// treating it as fatal, since audio I/O degrades gracefully without it.
pub fn set_realtime_priority() {
    let rc = unsafe {
        libc::sched_setscheduler(0, libc::SCHED_FIFO, &libc::sched_param { sched_priority: 99 })
    };

    if rc < 0 {
        static WARNED: AtomicBool = AtomicBool::new(false);
        let already_warned = WARNED.swap(true, Ordering::Relaxed);

        if !already_warned {
            let err = std::io::Error::last_os_error();
            log::warn!("failed to set realtime thread priority: {err}");

            if err.kind() == ErrorKind::PermissionDenied {
                let path = std::env::current_exe().map(|p| p.display().to_string());
                let path = path.as_deref().unwrap_or("path/to/btpcmd");
                log::warn!("fix by running: setcap cap_sys_nice=ep {path}");
            }
        }
    }
}

/// Spawns `body` on a new OS thread named `name` with realtime priority
/// requested up front. Factors out the spawn/`set_name`/`set_realtime_priority`
/// sequence every one of the original's own thread-creation call sites
/// repeats inline.
pub fn start<F, T>(name: &str, body: F) -> JoinHandle<T>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    let name = name.to_string();
    std::thread::spawn(move || {
        set_name(&name);
        set_realtime_priority();
        body()
    })
}
