//! Lock-free target position written by the motion layer.
//!
//! The target is an `f32` stored as bits in an atomic so the step generator
//! can advance it from interrupt-like context while the supervisor and the
//! tuning task read it without taking the engine lock.

use std::sync::atomic::{AtomicU32, Ordering};

#[derive(Debug)]
pub struct MotionTarget {
    target_bits: AtomicU32,
    microstep_bits: AtomicU32,
}

impl Default for MotionTarget {
    fn default() -> Self {
        Self::new()
    }
}

impl MotionTarget {
    /// Target at 0 steps with full-step increments.
    pub fn new() -> Self {
        Self {
            target_bits: AtomicU32::new(0.0f32.to_bits()),
            microstep_bits: AtomicU32::new(1.0f32.to_bits()),
        }
    }

    /// Current target [steps].
    #[inline]
    pub fn get(&self) -> f32 {
        f32::from_bits(self.target_bits.load(Ordering::Acquire))
    }

    #[inline]
    pub fn set(&self, steps: f32) {
        self.target_bits.store(steps.to_bits(), Ordering::Release);
    }

    /// Add `delta` steps atomically; returns the new target.
    #[inline]
    pub fn offset(&self, delta: f32) -> f32 {
        let mut new = 0.0;
        let _ = self
            .target_bits
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |bits| {
                new = f32::from_bits(bits) + delta;
                Some(new.to_bits())
            });
        new
    }

    /// Advance by one microstep in the given direction.
    #[inline]
    pub fn take_step(&self, forward: bool) -> f32 {
        let size = self.microstep();
        self.offset(if forward { size } else { -size })
    }

    /// Size of one microstep [steps].
    #[inline]
    pub fn microstep(&self) -> f32 {
        f32::from_bits(self.microstep_bits.load(Ordering::Relaxed))
    }

    /// Cache the drive's microstepping (microsteps per full step, 0 treated as 1).
    pub fn set_microstepping(&self, microsteps: u16) {
        let size = 1.0 / f32::from(microsteps.max(1));
        self.microstep_bits.store(size.to_bits(), Ordering::Relaxed);
    }
}
