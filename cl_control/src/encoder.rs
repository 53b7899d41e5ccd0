//! Active encoder slot.
//!
//! The engine owns exactly one encoder instance at a time. Changing the
//! encoder kind builds and enables the replacement first, then swaps it in,
//! dropping the old instance; a failed build leaves the old encoder active.

use cl_common::hal::{Encoder, EncoderFactory, EncoderKind, HardwareError};
use tracing::info;

pub struct EncoderSlot {
    factory: Box<dyn EncoderFactory>,
    active: Option<Box<dyn Encoder>>,
}

impl EncoderSlot {
    /// Empty slot (no encoder).
    pub fn new(factory: Box<dyn EncoderFactory>) -> Self {
        Self {
            factory,
            active: None,
        }
    }

    #[inline]
    pub fn kind(&self) -> EncoderKind {
        self.active.as_ref().map_or(EncoderKind::None, |e| e.kind())
    }

    #[inline]
    pub fn is_present(&self) -> bool {
        self.active.is_some()
    }

    /// Build and enable an encoder of `kind` without installing it.
    pub fn prepare(&mut self, kind: EncoderKind) -> Result<Option<Box<dyn Encoder>>, HardwareError> {
        if kind == EncoderKind::None {
            return Ok(None);
        }
        let mut encoder = self.factory.create(kind)?;
        encoder.enable()?;
        Ok(Some(encoder))
    }

    /// Replace the active encoder, dropping the previous one.
    pub fn install(&mut self, encoder: Option<Box<dyn Encoder>>) {
        let old = self.kind();
        self.active = encoder;
        info!("Encoder changed: {} -> {}", old, self.kind());
    }

    /// Build, enable and install an encoder of `kind`.
    pub fn replace(&mut self, kind: EncoderKind) -> Result<(), HardwareError> {
        let encoder = self.prepare(kind)?;
        self.install(encoder);
        Ok(())
    }

    /// Current reading, `None` without an encoder.
    #[inline]
    pub fn read(&mut self) -> Option<i32> {
        self.active.as_mut().map(|e| e.read())
    }

    /// Define the position currently reading `count` as zero.
    #[inline]
    pub fn set_zero_offset(&mut self, count: i32) {
        if let Some(e) = self.active.as_mut() {
            e.set_zero_offset(count);
        }
    }
}

impl std::fmt::Debug for EncoderSlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EncoderSlot")
            .field("kind", &self.kind())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixed {
        kind: EncoderKind,
        count: i32,
    }

    impl Encoder for Fixed {
        fn kind(&self) -> EncoderKind {
            self.kind
        }
        fn enable(&mut self) -> Result<(), HardwareError> {
            Ok(())
        }
        fn read(&mut self) -> i32 {
            self.count
        }
        fn set_zero_offset(&mut self, count: i32) {
            self.count -= count;
        }
    }

    /// Builds quadrature encoders only.
    struct QuadratureOnly;

    impl EncoderFactory for QuadratureOnly {
        fn create(&mut self, kind: EncoderKind) -> Result<Box<dyn Encoder>, HardwareError> {
            match kind {
                EncoderKind::LinearQuadrature | EncoderKind::RotaryQuadrature => {
                    Ok(Box::new(Fixed { kind, count: 7 }))
                }
                other => Err(HardwareError::UnsupportedEncoder(other)),
            }
        }
    }

    #[test]
    fn replace_swaps_strategy() {
        let mut slot = EncoderSlot::new(Box::new(QuadratureOnly));
        assert!(!slot.is_present());
        assert_eq!(slot.read(), None);

        slot.replace(EncoderKind::RotaryQuadrature).unwrap();
        assert_eq!(slot.kind(), EncoderKind::RotaryQuadrature);
        assert_eq!(slot.read(), Some(7));

        slot.set_zero_offset(7);
        assert_eq!(slot.read(), Some(0));

        slot.replace(EncoderKind::None).unwrap();
        assert!(!slot.is_present());
    }

    #[test]
    fn failed_build_keeps_old_encoder() {
        let mut slot = EncoderSlot::new(Box::new(QuadratureOnly));
        slot.replace(EncoderKind::LinearQuadrature).unwrap();
        let err = slot.replace(EncoderKind::As5047).unwrap_err();
        assert_eq!(err, HardwareError::UnsupportedEncoder(EncoderKind::As5047));
        assert_eq!(slot.kind(), EncoderKind::LinearQuadrature);
    }
}
