//! View navigation handlers.

use crate::error::HostError;
use crate::host::{Address, AnalysisHost};

/// Jump the view to an image-relative offset.
pub fn jump_to_offset(host: &dyn AnalysisHost, offset: u64) -> Result<Address, HostError> {
    let address = host.image_base().saturating_add(offset);
    host.jump_to(address)?;
    Ok(address)
}

#[cfg(test)]
mod tests {
    use super::jump_to_offset;
    use crate::host::memory::{test_fixture, InMemoryHost};
    use crate::host::AnalysisHost;

    #[test]
    fn offset_is_rebased_on_image_base() {
        let host = InMemoryHost::new(test_fixture());
        let address = jump_to_offset(&host, 0x2000).expect("jump");
        assert_eq!(address, 0x402000);
        assert_eq!(host.current_address(), 0x402000);
    }
}
