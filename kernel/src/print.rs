//! `print!`/`println!` for raw console output, and `serial_print!`/
//! `serial_println!` as their test-mode alias. Both go straight to the PL011
//! over `direct_uart`, bypassing the `log` facade -- useful for output that
//! must appear even if logging hasn't been initialized yet (early boot,
//! panic messages).

#[macro_export]
macro_rules! print {
    ($($arg:tt)*) => ({
        use core::fmt::Write;
        let _ = write!($crate::arch::aarch64::direct_uart::writer(), $($arg)*);
    });
}

#[macro_export]
macro_rules! println {
    () => ($crate::print!("\n"));
    ($($arg:tt)*) => ($crate::print!("{}\n", format_args!($($arg)*)));
}

#[macro_export]
macro_rules! serial_print {
    ($($arg:tt)*) => ($crate::print!($($arg)*));
}

#[macro_export]
macro_rules! serial_println {
    ($($arg:tt)*) => ($crate::println!($($arg)*));
}
