//! Language items for target (non-`std`) builds

// RTT transport for defmt frames
#[cfg(all(feature = "defmt", not(feature = "std")))]
use defmt_rtt as _;

// Defmt panic handler
#[cfg(all(feature = "defmt", not(feature = "std"), not(test)))]
#[panic_handler]
fn panic(info: &::core::panic::PanicInfo) -> ! {
    defmt::error!("panic: {}", defmt::Display2Format(info));
    crate::port::fatal_halt()
}

// Panic handler when defmt is disabled
#[cfg(all(not(feature = "defmt"), not(feature = "std"), not(test)))]
#[panic_handler]
fn panic(_: &::core::panic::PanicInfo) -> ! {
    crate::port::fatal_halt()
}

// Defmt timestamp in OSAL ticks
#[cfg(all(feature = "defmt", not(feature = "std")))]
defmt::timestamp!("{=u32}", crate::port::get_time());
