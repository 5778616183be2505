use crate::error::ControlError;

/// Byte-level access to a half-duplex servo bus.
///
/// Reads never block: the execution layer polls [`bytes_available`]
/// and only reads what is already buffered.
///
/// [`bytes_available`]: BusTransport::bytes_available
pub trait BusTransport: Send + 'static {
    fn write_all(&mut self, bytes: &[u8]) -> Result<(), ControlError>;

    fn bytes_available(&mut self) -> Result<usize, ControlError>;

    /// Read at most `buf.len()` already-buffered bytes.
    fn read_available(&mut self, buf: &mut [u8]) -> Result<usize, ControlError>;

    /// Drop anything left over from a previous exchange.
    fn clear_input(&mut self) -> Result<(), ControlError> {
        let mut trash = [0u8; 64];
        while self.bytes_available()? > 0 {
            if self.read_available(&mut trash)? == 0 {
                break;
            }
        }
        Ok(())
    }
}
