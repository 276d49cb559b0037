/// Lifecycle notifications for the protocol layers above the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusEvent {
    /// One unit was reset with DEVICE RESET.
    UnitReset { unit: u8 },
    /// Every unit on the bus was reset.
    BusReset,
    /// The bus went away; nothing further will complete successfully.
    Terminated,
}
