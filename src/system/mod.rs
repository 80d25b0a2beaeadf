pub mod executor;
pub mod prober;
pub mod vmlinux;
