//! Turns fatal signals into a structured error report.
//!
//! A crash inside the photon loop would otherwise terminate the process
//! silently; the handlers print the offending signal and a captured
//! back-trace before aborting.

/// Installs handlers for the common fatal signals.
#[cfg(unix)]
pub fn install() {
    unsafe {
        libc::signal(libc::SIGSEGV, handler as libc::sighandler_t);
        libc::signal(libc::SIGBUS, handler as libc::sighandler_t);
    }
}

/// No-op on platforms without POSIX signals.
#[cfg(not(unix))]
pub fn install() {}

#[cfg(unix)]
extern "C" fn handler(signal: i32) {
    // not async-signal-safe, but the process dies either way; a best
    // effort report beats silence
    let name = match signal {
        libc::SIGSEGV => "segmentation fault",
        libc::SIGBUS => "bus error",
        _ => "fatal signal",
    };
    eprintln!("\x1b[31mFatal error: {name}\x1b[0m");
    eprintln!("Call stack of the offending thread:");
    eprintln!("{}", std::backtrace::Backtrace::force_capture());
    std::process::abort();
}
