// =============================================================================
// FerrumOS — Process Table & Round-Robin Scheduler
// =============================================================================
//
// Tasks are described by PCBs held in an arena (a Vec indexed by slot);
// `next` links are slot indices forming the circular ready ring the
// scheduler walks. Slot 0 is the idle task — the kernel execution flow
// that booted the machine — and it is *always* Ready, which is what
// guarantees the scheduler's selection loop terminates.
//
// A task that has never run is resumed the same way as a preempted one:
// its creator synthesizes a register frame at the top of a fresh kernel
// stack, laid out exactly as the interrupt stubs leave one, and records
// the frame's address as the task's stack cursor. When the scheduler
// returns that cursor, the common stub's restore path pops the fabricated
// state and "returns" into the entry point.
//
// Kernel tasks get a 17-word frame (no privilege change, so iretd pops
// only EIP/CS/EFLAGS). User tasks get the full 19-word frame: iretd pops
// SS:ESP as well and drops to Ring 3 with the user stack installed.
//
// Entry points are `extern "C" fn() -> !`: a task returning from its
// entry would walk off a fabricated stack, so the type system simply
// forbids it.
//
// =============================================================================

use alloc::boxed::Box;
use alloc::string::String;
use alloc::vec::Vec;
use core::alloc::Layout;

use crate::arch::selectors;
use crate::interrupts::frame::{INITIAL_EFLAGS, KERNEL_FRAME_WORDS, USER_FRAME_WORDS};
use crate::sync::SpinLock;

/// A task entry point. `-> !` makes "tasks never return" structural.
pub type TaskEntry = extern "C" fn() -> !;

/// Size of each per-task stack (kernel and user alike).
pub const TASK_STACK_SIZE: usize = 4096;

/// A heap-allocated task stack. 8-aligned, which is all the kernel heap
/// guarantees and all a 32-bit frame needs.
#[repr(C, align(8))]
pub struct TaskStack {
    data: [u8; TASK_STACK_SIZE],
}

impl TaskStack {
    /// Top of the stack (stacks grow downward).
    pub fn top(&self) -> usize {
        self.data.as_ptr() as usize + TASK_STACK_SIZE
    }

    /// Allocate a zeroed stack directly on the heap, without staging the
    /// 4 KiB array on the caller's own stack first.
    fn boxed() -> Box<TaskStack> {
        let layout = Layout::new::<TaskStack>();
        // SAFETY: the layout is non-zero; a null return is a fatal OOM.
        unsafe {
            let ptr = alloc::alloc::alloc_zeroed(layout) as *mut TaskStack;
            if ptr.is_null() {
                panic!("out of heap for a task stack");
            }
            Box::from_raw(ptr)
        }
    }
}

/// Scheduling states. There is no Dead: tasks cannot exit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    /// Eligible for selection.
    Ready,
    /// Waiting out a sleep; woken by the timer tick.
    Sleeping,
}

/// A process control block.
pub struct Pcb {
    pub pid: u32,
    #[allow(dead_code)]
    pub name: String,
    pub state: TaskState,
    /// Remaining timer ticks while Sleeping.
    pub sleep_ticks: u32,
    /// Saved stack cursor: the address of this task's register frame.
    pub esp: usize,
    /// Top of the kernel stack, loaded into TSS.ESP0 while this task runs.
    pub kernel_stack_top: usize,
    /// Ring successor (slot index into the arena).
    next: usize,
    /// Owning handle for the kernel stack; None only for the idle task,
    /// which runs on the boot stack.
    _kernel_stack: Option<Box<TaskStack>>,
    /// Owning handle for the Ring 3 stack of user tasks.
    _user_stack: Option<Box<TaskStack>>,
}

// =============================================================================
// Frame synthesis
// =============================================================================

/// Writes a same-ring register frame at the top of `stack_top` so the
/// interrupt restore path resumes execution at `entry` in Ring 0 with
/// interrupts enabled and all general registers zero.
///
/// Returns the frame's address (the new stack cursor).
///
/// # Safety
/// `stack_top` must be the top of a writable stack with at least
/// `KERNEL_FRAME_WORDS * 4` bytes below it.
unsafe fn build_kernel_frame(stack_top: usize, entry: usize) -> usize {
    let base = stack_top - KERNEL_FRAME_WORDS * 4;
    let words = base as *mut u32;
    unsafe {
        // gs, fs, es, ds — kernel data segments.
        for i in 0..4 {
            words.add(i).write(selectors::KERNEL_DATA as u32);
        }
        // edi, esi, ebp, esp, ebx, edx, ecx, eax — all zero.
        for i in 4..12 {
            words.add(i).write(0);
        }
        words.add(12).write(0); // int_no (dummy, balances the stub's add esp, 8)
        words.add(13).write(0); // err_code (dummy)
        words.add(14).write(entry as u32); // eip
        words.add(15).write(selectors::KERNEL_CODE as u32); // cs
        words.add(16).write(INITIAL_EFLAGS); // eflags, IF=1
    }
    base
}

/// Writes a cross-ring register frame: iretd additionally pops
/// `useresp`/`ss`, landing at `entry` in Ring 3 on the user stack.
///
/// # Safety
/// As [`build_kernel_frame`], with `USER_FRAME_WORDS * 4` bytes of room.
unsafe fn build_user_frame(kstack_top: usize, entry: usize, user_stack_top: usize) -> usize {
    let base = kstack_top - USER_FRAME_WORDS * 4;
    let words = base as *mut u32;
    unsafe {
        // gs, fs, es, ds — user data segments (RPL 3).
        for i in 0..4 {
            words.add(i).write(selectors::USER_DATA as u32);
        }
        for i in 4..12 {
            words.add(i).write(0);
        }
        words.add(12).write(0); // int_no
        words.add(13).write(0); // err_code
        words.add(14).write(entry as u32); // eip
        words.add(15).write(selectors::USER_CODE as u32); // cs
        words.add(16).write(INITIAL_EFLAGS); // eflags
        words.add(17).write(user_stack_top as u32); // useresp
        words.add(18).write(selectors::USER_DATA as u32); // ss
    }
    base
}

// =============================================================================
// The table
// =============================================================================

/// PCB arena plus the scheduler state.
pub struct ProcessTable {
    tasks: Vec<Pcb>,
    /// Slot of the task owning the CPU.
    current: usize,
    next_pid: u32,
}

impl ProcessTable {
    pub const fn new() -> Self {
        Self {
            tasks: Vec::new(),
            current: 0,
            next_pid: 1,
        }
    }

    /// True once `init` has installed the idle task.
    pub fn is_initialized(&self) -> bool {
        !self.tasks.is_empty()
    }

    /// Install the idle PCB (PID 0) for the already-running kernel flow.
    ///
    /// No stack is allocated — we are running on it. Its cursor is filled
    /// in the first time it is switched away from.
    pub fn init(&mut self, boot_stack_top: usize) {
        debug_assert!(self.tasks.is_empty());
        self.tasks.push(Pcb {
            pid: 0,
            name: String::from("kernel_idle"),
            state: TaskState::Ready,
            sleep_ticks: 0,
            esp: 0,
            kernel_stack_top: boot_stack_top,
            next: 0, // self-linked ring of one
            _kernel_stack: None,
            _user_stack: None,
        });
        self.current = 0;
    }

    /// Splice a PCB into the ring right after the idle head.
    fn insert_after_head(&mut self, mut pcb: Pcb) -> u32 {
        let pid = pcb.pid;
        let slot = self.tasks.len();
        pcb.next = self.tasks[0].next;
        self.tasks.push(pcb);
        self.tasks[0].next = slot;
        pid
    }

    /// Create a kernel-mode task. Returns its PID.
    pub fn create(&mut self, entry: usize, name: &str) -> u32 {
        let kernel_stack = TaskStack::boxed();
        let top = kernel_stack.top();
        // SAFETY: `top` caps a fresh, exclusively owned 4 KiB stack.
        let esp = unsafe { build_kernel_frame(top, entry) };

        let pid = self.next_pid;
        self.next_pid += 1;
        self.insert_after_head(Pcb {
            pid,
            name: String::from(name),
            state: TaskState::Ready,
            sleep_ticks: 0,
            esp,
            kernel_stack_top: top,
            next: 0,
            _kernel_stack: Some(kernel_stack),
            _user_stack: None,
        })
    }

    /// Create a Ring 3 task: a kernel stack for interrupt entry plus a
    /// user stack for the task itself. Returns its PID.
    pub fn create_user(&mut self, entry: usize, name: &str) -> u32 {
        let kernel_stack = TaskStack::boxed();
        let user_stack = TaskStack::boxed();
        let ktop = kernel_stack.top();
        let utop = user_stack.top();
        // SAFETY: both stacks are fresh and exclusively owned.
        let esp = unsafe { build_user_frame(ktop, entry, utop) };

        let pid = self.next_pid;
        self.next_pid += 1;
        self.insert_after_head(Pcb {
            pid,
            name: String::from(name),
            state: TaskState::Ready,
            sleep_ticks: 0,
            esp,
            kernel_stack_top: ktop,
            next: 0,
            _kernel_stack: Some(kernel_stack),
            _user_stack: Some(user_stack),
        })
    }

    /// Scheduler core: store the preempted task's cursor, advance around
    /// the ring to the next Ready task, return its cursor.
    ///
    /// Termination is guaranteed because the idle task never leaves Ready.
    pub fn reschedule(&mut self, current_cursor: usize) -> usize {
        if self.tasks.is_empty() {
            return current_cursor;
        }
        self.tasks[self.current].esp = current_cursor;

        let mut next = self.tasks[self.current].next;
        while self.tasks[next].state != TaskState::Ready {
            next = self.tasks[next].next;
        }
        self.current = next;
        self.tasks[self.current].esp
    }

    /// Kernel stack top of the task selected by the last `reschedule`.
    pub fn current_kernel_stack_top(&self) -> usize {
        self.tasks[self.current].kernel_stack_top
    }

    /// PID of the task owning the CPU.
    pub fn current_pid(&self) -> u32 {
        self.tasks[self.current].pid
    }

    /// Decrement every sleeper's counter; counters hitting zero wake the
    /// task, making it eligible in the selection that follows this call.
    pub fn tick_sleepers(&mut self) {
        for pcb in &mut self.tasks {
            if pcb.state == TaskState::Sleeping {
                if pcb.sleep_ticks > 0 {
                    pcb.sleep_ticks -= 1;
                }
                if pcb.sleep_ticks == 0 {
                    pcb.state = TaskState::Ready;
                }
            }
        }
    }

    /// Put the current task to sleep for `ticks`. Ignored for the idle
    /// task — PID 0 must stay Ready.
    pub fn sleep_current(&mut self, ticks: u32) {
        let pcb = &mut self.tasks[self.current];
        if pcb.pid != 0 {
            pcb.state = TaskState::Sleeping;
            pcb.sleep_ticks = ticks;
        }
    }
}

/// Timer ticks for a sleep of `ms` milliseconds at the 100 Hz PIT rate:
/// ceil(ms / 10), at least one tick.
pub fn sleep_ticks_for_ms(ms: u32) -> u32 {
    ((ms + 9) / 10).max(1)
}

// =============================================================================
// Global table and the interrupt-side API
// =============================================================================

static PROCESS_TABLE: SpinLock<ProcessTable> = SpinLock::new(ProcessTable::new());

/// Install the idle PCB for the boot flow. Call once, after the heap is
/// up (PCBs live there).
pub fn init(boot_stack_top: usize) {
    PROCESS_TABLE.lock().init(boot_stack_top);
    klog::info!("process: multitasking ready, kernel is PID 0");
}

/// Spawn a kernel-mode task.
pub fn create(entry: TaskEntry, name: &str) -> u32 {
    let pid = PROCESS_TABLE.lock().create(entry as usize, name);
    klog::info!("process: created kernel task '{}' (PID {})", name, pid);
    pid
}

/// Spawn a Ring 3 task.
pub fn create_user(entry: TaskEntry, name: &str) -> u32 {
    let pid = PROCESS_TABLE.lock().create_user(entry as usize, name);
    klog::info!("process: created user task '{}' (PID {})", name, pid);
    pid
}

/// Timer-tick sleep bookkeeping; runs before scheduling on every tick.
pub fn tick_sleepers() {
    PROCESS_TABLE.lock().tick_sleepers()
}

/// Mark the current task Sleeping for `ticks`.
pub fn sleep_current(ticks: u32) {
    PROCESS_TABLE.lock().sleep_current(ticks)
}

/// Switch tasks: store the interrupted frame as the current task's
/// cursor, pick the next Ready task, point TSS.ESP0 at its kernel stack,
/// and hand its frame back to the stub.
#[cfg(target_arch = "x86")]
pub fn schedule(
    frame: *mut crate::interrupts::frame::Registers,
) -> *mut crate::interrupts::frame::Registers {
    let mut table = PROCESS_TABLE.lock();
    if !table.is_initialized() {
        return frame;
    }
    let next = table.reschedule(frame as usize);
    crate::arch::gdt::set_kernel_stack(table.current_kernel_stack_top() as u32);
    next as *mut crate::interrupts::frame::Registers
}

#[cfg(test)]
mod tests {
    use super::*;

    extern "C" fn never_returns() -> ! {
        unreachable!("synthesized frames are never executed in tests")
    }

    fn table_with(boot_top: usize) -> ProcessTable {
        let mut table = ProcessTable::new();
        table.init(boot_top);
        table
    }

    /// Read the synthesized frame below a known stack top as raw words.
    fn frame_words(top: usize, count: usize) -> Vec<u32> {
        let base = (top - count * 4) as *const u32;
        (0..count).map(|i| unsafe { base.add(i).read() }).collect()
    }

    #[test]
    fn idle_is_pid0_and_ready() {
        let table = table_with(0x9_0000);
        assert_eq!(table.current_pid(), 0);
        assert_eq!(table.tasks[0].state, TaskState::Ready);
        assert_eq!(table.tasks[0].next, 0);
    }

    #[test]
    fn kernel_frame_seeds_ring0_resume_state() {
        let stack = TaskStack::boxed();
        let top = stack.top();
        let esp = unsafe { build_kernel_frame(top, never_returns as usize) };
        assert_eq!(esp, top - KERNEL_FRAME_WORDS * 4);

        let words = frame_words(top, KERNEL_FRAME_WORDS);
        // Segments
        for i in 0..4 {
            assert_eq!(words[i], selectors::KERNEL_DATA as u32);
        }
        // General registers zeroed
        for i in 4..12 {
            assert_eq!(words[i], 0);
        }
        // Dummy vector/error pair
        assert_eq!(words[12], 0);
        assert_eq!(words[13], 0);
        // iretd tail
        assert_eq!(words[14], never_returns as usize as u32);
        assert_eq!(words[15], selectors::KERNEL_CODE as u32);
        assert_eq!(words[16], INITIAL_EFLAGS);
    }

    #[test]
    fn user_frame_targets_ring3_with_user_stack() {
        let kstack = TaskStack::boxed();
        let ustack = TaskStack::boxed();
        let esp = unsafe { build_user_frame(kstack.top(), never_returns as usize, ustack.top()) };
        assert_eq!(esp, kstack.top() - USER_FRAME_WORDS * 4);

        let words = frame_words(kstack.top(), USER_FRAME_WORDS);
        for i in 0..4 {
            assert_eq!(words[i], selectors::USER_DATA as u32);
        }
        assert_eq!(words[14], never_returns as usize as u32);
        assert_eq!(words[15], selectors::USER_CODE as u32);
        assert_eq!(words[16], INITIAL_EFLAGS);
        assert_eq!(words[17], ustack.top() as u32);
        assert_eq!(words[18], selectors::USER_DATA as u32);
    }

    #[test]
    fn ring_inserts_after_head() {
        let mut table = table_with(0x9_0000);
        table.create(never_returns as usize, "a");
        table.create(never_returns as usize, "b");
        table.create(never_returns as usize, "c");
        // Ring: idle → c → b → a → idle.
        let order: Vec<u32> = {
            let mut out = Vec::new();
            let mut slot = table.tasks[0].next;
            while slot != 0 {
                out.push(table.tasks[slot].pid);
                slot = table.tasks[slot].next;
            }
            out
        };
        assert_eq!(order, vec![3, 2, 1]);
    }

    #[test]
    fn round_robin_visits_each_task_once_per_cycle() {
        let mut table = table_with(0x9_0000);
        table.create(never_returns as usize, "a");
        table.create(never_returns as usize, "b");
        table.create(never_returns as usize, "c");

        let mut seen = Vec::new();
        let mut cursor = 0xDEAD_0000usize;
        for _ in 0..8 {
            cursor = table.reschedule(cursor);
            seen.push(table.current_pid());
        }
        // Strict rotation over the 4-task ring, starting at idle's
        // successor: every task exactly once per window of 4.
        assert_eq!(seen, vec![3, 2, 1, 0, 3, 2, 1, 0]);
    }

    #[test]
    fn reschedule_saves_and_restores_cursors() {
        let mut table = table_with(0x9_0000);
        table.create(never_returns as usize, "a");
        let a_frame = table.tasks[1].esp;

        // Idle preempted at some cursor → a's synthesized frame comes back.
        let next = table.reschedule(0x1234_5678);
        assert_eq!(next, a_frame);
        assert_eq!(table.tasks[0].esp, 0x1234_5678);

        // a preempted → idle's saved cursor comes back.
        let next = table.reschedule(0xAAAA_0000);
        assert_eq!(next, 0x1234_5678);
        assert_eq!(table.tasks[1].esp, 0xAAAA_0000);
    }

    #[test]
    fn sleeping_tasks_are_skipped_until_woken() {
        let mut table = table_with(0x9_0000);
        table.create(never_returns as usize, "a");
        table.create(never_returns as usize, "b");

        // Run to b (idle's successor).
        table.reschedule(0);
        assert_eq!(table.current_pid(), 2);
        table.sleep_current(2);

        // Tick 1: counter 2 → 1, b stays asleep and keeps the CPU slot
        // until the selection that follows.
        table.tick_sleepers();
        assert_eq!(table.current_pid(), 2);
        let mut pids = Vec::new();
        for _ in 0..3 {
            table.tick_sleepers();
            table.reschedule(0);
            pids.push(table.current_pid());
        }
        // Tick 2 wakes b but selection starts at its successor, so the
        // rotation resumes a → idle → b.
        assert_eq!(pids, vec![1, 0, 2]);
    }

    #[test]
    fn wake_on_tick_is_eligible_same_tick() {
        let mut table = table_with(0x9_0000);
        table.create(never_returns as usize, "a");

        table.reschedule(0); // → a
        table.sleep_current(1);
        // Tick N: counters first, then selection — a must be picked again.
        table.tick_sleepers();
        table.reschedule(0);
        assert_eq!(table.current_pid(), 1);
    }

    #[test]
    fn idle_cannot_be_put_to_sleep() {
        let mut table = table_with(0x9_0000);
        table.sleep_current(100);
        assert_eq!(table.tasks[0].state, TaskState::Ready);
    }

    #[test]
    fn sleep_tick_conversion_is_ceiling_with_floor_one() {
        assert_eq!(sleep_ticks_for_ms(0), 1);
        assert_eq!(sleep_ticks_for_ms(1), 1);
        assert_eq!(sleep_ticks_for_ms(10), 1);
        assert_eq!(sleep_ticks_for_ms(11), 2);
        assert_eq!(sleep_ticks_for_ms(500), 50);
        assert_eq!(sleep_ticks_for_ms(505), 51);
    }

    #[test]
    fn pids_are_monotonic_from_one() {
        let mut table = table_with(0x9_0000);
        assert_eq!(table.create(never_returns as usize, "a"), 1);
        assert_eq!(table.create_user(never_returns as usize, "u"), 2);
        assert_eq!(table.create(never_returns as usize, "b"), 3);
    }
}
