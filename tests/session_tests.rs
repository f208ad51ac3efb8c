use dynval_logger::taint_tracker::{O_RDONLY, O_WRONLY};
use dynval_logger::{
    parse_function_log, unit_names, DynValEntry, IrModule, MemlogReader, RuntimeControl,
    SyscallEvent, TraceConfig, TraceError, TraceSession, TranslationUnit,
};
use parking_lot::Mutex;
use std::fs;
use std::sync::Arc;

#[derive(Debug, Default)]
struct Switches {
    memcb: bool,
    full_trace: bool,
    full_trace_enables: usize,
}

#[derive(Clone, Default)]
struct FakeRuntime(Arc<Mutex<Switches>>);

impl RuntimeControl for FakeRuntime {
    fn enable_memory_callbacks(&mut self) {
        self.0.lock().memcb = true;
    }

    fn disable_memory_callbacks(&mut self) {
        self.0.lock().memcb = false;
    }

    fn full_trace_enabled(&self) -> bool {
        self.0.lock().full_trace
    }

    fn enable_full_trace(&mut self) {
        let mut s = self.0.lock();
        s.full_trace = true;
        s.full_trace_enables += 1;
    }

    fn disable_full_trace(&mut self) {
        self.0.lock().full_trace = false;
    }
}

#[test]
fn test_session_writes_consistent_logs() {
    let dir = tempfile::tempdir().unwrap();
    let config = TraceConfig::default().with_out_dir(dir.path());
    let runtime = FakeRuntime::default();
    let switches = runtime.0.clone();

    let mut session = TraceSession::start(config.clone(), runtime).unwrap();
    assert!(switches.lock().memcb);
    assert!(switches.lock().full_trace);

    let a = TranslationUnit::new("tcg-llvm-tb-1-400000", 0x400000);
    let b = TranslationUnit::new("tcg-llvm-tb-2-400010", 0x400010);
    {
        let controller = session.controller();
        controller.define_unit(a, "define void @a() { ret void }");
        controller.define_unit(b, "define void @b() { ret void }");

        controller.on_unit_enter(a).unwrap();
        controller.log(DynValEntry::load(1));
        controller.log(DynValEntry::load(2));
        controller.log(DynValEntry::load(3));
        controller.on_unit_exit(a, Some(b)).unwrap();

        controller.on_unit_enter(b).unwrap();
        controller.log(DynValEntry::load(4));
        controller.on_exception(b).unwrap();
    }
    let stats = session.finish().unwrap();
    assert_eq!(stats.segments_flushed, 2);
    assert!(!switches.lock().memcb);
    assert!(!switches.lock().full_trace);

    let text = fs::read_to_string(config.function_log_path()).unwrap();
    let lines = parse_function_log(&text);
    assert_eq!(unit_names(&lines), vec![a.name, b.name]);

    let data = fs::read(config.memlog_path()).unwrap();
    let values: Vec<u64> = MemlogReader::new(&data).map(|e| e.value).collect();
    assert_eq!(values, vec![1, 2, 3, 4, 0x400010]);

    let module = IrModule::read_from(&config.module_path()).unwrap();
    assert_eq!(module.len(), 2);
    assert!(module.contains(a.name));
}

#[test]
fn test_full_trace_left_alone_if_already_on() {
    let dir = tempfile::tempdir().unwrap();
    let runtime = FakeRuntime::default();
    runtime.0.lock().full_trace = true;
    let switches = runtime.0.clone();

    let session =
        TraceSession::start(TraceConfig::default().with_out_dir(dir.path()), runtime).unwrap();
    assert_eq!(switches.lock().full_trace_enables, 0);
    session.finish().unwrap();
    assert!(!switches.lock().full_trace);
}

#[test]
fn test_taint_lines_reach_function_log() {
    let dir = tempfile::tempdir().unwrap();
    let config = TraceConfig::default().with_out_dir(dir.path());
    let mut session = TraceSession::start(config.clone(), FakeRuntime::default()).unwrap();

    let controller = session.controller();
    for event in [
        SyscallEvent::Open { path: "/etc/passwd".into(), flags: O_RDONLY, ret: 3 },
        SyscallEvent::Open { path: "/home/user/input.bin".into(), flags: O_RDONLY, ret: 5 },
        SyscallEvent::OpenAt { path: "/home/user/out.bin".into(), flags: O_WRONLY, ret: 6 },
        SyscallEvent::Read { fd: 3, buf: 0x100, ret: 64 },
        SyscallEvent::Read { fd: 5, buf: 0x200, ret: 100 },
        SyscallEvent::Write { fd: 6, buf: 0x300, ret: 8 },
    ] {
        controller.on_syscall(&event).unwrap();
    }
    session.finish().unwrap();

    let text = fs::read_to_string(config.function_log_path()).unwrap();
    assert_eq!(text, "taint,read,512,100\ntaint,write,768,8\n");
}

#[test]
fn test_invalid_config_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let config = TraceConfig::default()
        .with_out_dir(dir.path())
        .with_buffer_capacity(4096, 16);
    let runtime = FakeRuntime::default();
    let switches = runtime.0.clone();

    let result = TraceSession::start(config, runtime);
    assert!(matches!(result, Err(TraceError::Config(_))));
    assert!(!switches.lock().memcb);
}

#[test]
fn test_oversized_buffer_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let runtime = FakeRuntime::default();
    let switches = runtime.0.clone();

    let config = TraceConfig::default()
        .with_out_dir(dir.path())
        .with_buffer_capacity(usize::MAX, usize::MAX);
    let result = TraceSession::start(config, runtime.clone());
    assert!(matches!(result, Err(TraceError::Config(_))));

    // Passes validation but no allocator can satisfy it.
    #[cfg(target_pointer_width = "64")]
    {
        let config = TraceConfig::default()
            .with_out_dir(dir.path())
            .with_buffer_capacity(1 << 62, 1 << 62);
        assert!(config.validate().is_ok());
        let result = TraceSession::start(config, runtime);
        assert!(matches!(result, Err(TraceError::BufferOverflow { .. })));
    }

    assert!(!switches.lock().memcb);
    assert!(!switches.lock().full_trace);
}

#[test]
fn test_dropped_session_restores_runtime() {
    let dir = tempfile::tempdir().unwrap();
    let runtime = FakeRuntime::default();
    let switches = runtime.0.clone();
    {
        let _session =
            TraceSession::start(TraceConfig::default().with_out_dir(dir.path()), runtime).unwrap();
        assert!(switches.lock().memcb);
    }
    assert!(!switches.lock().memcb);
    assert!(!switches.lock().full_trace);
}

#[test]
fn test_dropped_session_still_writes_module() {
    let dir = tempfile::tempdir().unwrap();
    let config = TraceConfig::default().with_out_dir(dir.path());
    let a = TranslationUnit::new("tcg-llvm-tb-1-400000", 0x400000);
    {
        let mut session = TraceSession::start(config.clone(), FakeRuntime::default()).unwrap();
        let controller = session.controller();
        controller.define_unit(a, "define void @a() { ret void }");
        controller.on_unit_enter(a).unwrap();
        controller.log(DynValEntry::store(7));
    }

    let module = IrModule::read_from(&config.module_path()).unwrap();
    assert!(module.contains(a.name));

    let data = fs::read(config.memlog_path()).unwrap();
    let values: Vec<u64> = MemlogReader::new(&data).map(|e| e.value).collect();
    assert_eq!(values, vec![7]);
}
