mod pool;
#[cfg(unix)]
mod tool;
