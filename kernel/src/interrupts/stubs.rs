//! Per-vector interrupt entry stubs.
//!
//! Each stub pushes the vector number (and a dummy error code when the CPU
//! does not supply one), then funnels into a common stub that saves the
//! rest of the [`Registers`](super::frame::Registers) frame, switches to
//! kernel data segments, and calls the Rust handler with the frame
//! pointer.
//!
//! The handler's return value becomes the new ESP: returning the input
//! frame resumes the interrupted context, returning another task's saved
//! frame performs a context switch. The restore path pops segments and
//! general registers, discards the vector/error pair, and `iretd`s.

use core::arch::global_asm;

// The two common stubs. EAX may be clobbered freely before `pushad` has
// run — it hasn't; `pushad` is first. Data segments are forced to the
// kernel selectors because a Ring 3 entry arrives with user segments.
global_asm!(
    r#"
    .global isr_common_stub
    isr_common_stub:
        pushad
        push ds
        push es
        push fs
        push gs
        mov ax, 0x10
        mov ds, ax
        mov es, ax
        mov fs, ax
        mov gs, ax
        push esp
        call exception_handler
        mov esp, eax
        pop gs
        pop fs
        pop es
        pop ds
        popad
        add esp, 8
        iretd

    .global irq_common_stub
    irq_common_stub:
        pushad
        push ds
        push es
        push fs
        push gs
        mov ax, 0x10
        mov ds, ax
        mov es, ax
        mov fs, ax
        mov gs, ax
        push esp
        call irq_handler
        mov esp, eax
        pop gs
        pop fs
        pop es
        pop ds
        popad
        add esp, 8
        iretd
    "#
);

/// Vectors where the CPU pushes an error code itself; every other stub
/// pushes a dummy zero to keep the frame layout uniform.
macro_rules! isr_stub {
    ($name:ident, $vector:literal) => {
        global_asm!(concat!(
            ".global ",
            stringify!($name),
            "\n",
            stringify!($name),
            ":\n",
            "    push 0\n",
            "    push ",
            stringify!($vector),
            "\n",
            "    jmp isr_common_stub\n"
        ));
    };
}

macro_rules! isr_stub_err {
    ($name:ident, $vector:literal) => {
        global_asm!(concat!(
            ".global ",
            stringify!($name),
            "\n",
            stringify!($name),
            ":\n",
            "    push ",
            stringify!($vector),
            "\n",
            "    jmp isr_common_stub\n"
        ));
    };
}

macro_rules! irq_stub {
    ($name:ident, $vector:literal) => {
        global_asm!(concat!(
            ".global ",
            stringify!($name),
            "\n",
            stringify!($name),
            ":\n",
            "    push 0\n",
            "    push ",
            stringify!($vector),
            "\n",
            "    jmp irq_common_stub\n"
        ));
    };
}

isr_stub!(isr0, 0);
isr_stub!(isr1, 1);
isr_stub!(isr2, 2);
isr_stub!(isr3, 3);
isr_stub!(isr4, 4);
isr_stub!(isr5, 5);
isr_stub!(isr6, 6);
isr_stub!(isr7, 7);
isr_stub_err!(isr8, 8);
isr_stub!(isr9, 9);
isr_stub_err!(isr10, 10);
isr_stub_err!(isr11, 11);
isr_stub_err!(isr12, 12);
isr_stub_err!(isr13, 13);
isr_stub_err!(isr14, 14);
isr_stub!(isr15, 15);
isr_stub!(isr16, 16);
isr_stub_err!(isr17, 17);
isr_stub!(isr18, 18);
isr_stub!(isr19, 19);
isr_stub!(isr20, 20);
isr_stub!(isr21, 21);
isr_stub!(isr22, 22);
isr_stub!(isr23, 23);
isr_stub!(isr24, 24);
isr_stub!(isr25, 25);
isr_stub!(isr26, 26);
isr_stub!(isr27, 27);
isr_stub!(isr28, 28);
isr_stub!(isr29, 29);
isr_stub!(isr30, 30);
isr_stub!(isr31, 31);
isr_stub!(isr128, 128);

irq_stub!(irq0, 32);
irq_stub!(irq1, 33);
irq_stub!(irq2, 34);
irq_stub!(irq3, 35);
irq_stub!(irq4, 36);
irq_stub!(irq5, 37);
irq_stub!(irq6, 38);
irq_stub!(irq7, 39);
irq_stub!(irq8, 40);
irq_stub!(irq9, 41);
irq_stub!(irq10, 42);
irq_stub!(irq11, 43);
irq_stub!(irq12, 44);
irq_stub!(irq13, 45);
irq_stub!(irq14, 46);
irq_stub!(irq15, 47);

extern "C" {
    fn isr0();
    fn isr1();
    fn isr2();
    fn isr3();
    fn isr4();
    fn isr5();
    fn isr6();
    fn isr7();
    fn isr8();
    fn isr9();
    fn isr10();
    fn isr11();
    fn isr12();
    fn isr13();
    fn isr14();
    fn isr15();
    fn isr16();
    fn isr17();
    fn isr18();
    fn isr19();
    fn isr20();
    fn isr21();
    fn isr22();
    fn isr23();
    fn isr24();
    fn isr25();
    fn isr26();
    fn isr27();
    fn isr28();
    fn isr29();
    fn isr30();
    fn isr31();
    fn isr128();
    fn irq0();
    fn irq1();
    fn irq2();
    fn irq3();
    fn irq4();
    fn irq5();
    fn irq6();
    fn irq7();
    fn irq8();
    fn irq9();
    fn irq10();
    fn irq11();
    fn irq12();
    fn irq13();
    fn irq14();
    fn irq15();
}

/// Stub addresses for exception vectors 0–31, in vector order.
pub fn exception_stubs() -> [u32; 32] {
    [
        isr0 as usize as u32,
        isr1 as usize as u32,
        isr2 as usize as u32,
        isr3 as usize as u32,
        isr4 as usize as u32,
        isr5 as usize as u32,
        isr6 as usize as u32,
        isr7 as usize as u32,
        isr8 as usize as u32,
        isr9 as usize as u32,
        isr10 as usize as u32,
        isr11 as usize as u32,
        isr12 as usize as u32,
        isr13 as usize as u32,
        isr14 as usize as u32,
        isr15 as usize as u32,
        isr16 as usize as u32,
        isr17 as usize as u32,
        isr18 as usize as u32,
        isr19 as usize as u32,
        isr20 as usize as u32,
        isr21 as usize as u32,
        isr22 as usize as u32,
        isr23 as usize as u32,
        isr24 as usize as u32,
        isr25 as usize as u32,
        isr26 as usize as u32,
        isr27 as usize as u32,
        isr28 as usize as u32,
        isr29 as usize as u32,
        isr30 as usize as u32,
        isr31 as usize as u32,
    ]
}

/// Stub address for the syscall vector (128).
pub fn syscall_stub() -> u32 {
    isr128 as usize as u32
}

/// Stub addresses for hardware interrupt vectors 32–47, in vector order.
pub fn irq_stubs() -> [u32; 16] {
    [
        irq0 as usize as u32,
        irq1 as usize as u32,
        irq2 as usize as u32,
        irq3 as usize as u32,
        irq4 as usize as u32,
        irq5 as usize as u32,
        irq6 as usize as u32,
        irq7 as usize as u32,
        irq8 as usize as u32,
        irq9 as usize as u32,
        irq10 as usize as u32,
        irq11 as usize as u32,
        irq12 as usize as u32,
        irq13 as usize as u32,
        irq14 as usize as u32,
        irq15 as usize as u32,
    ]
}
