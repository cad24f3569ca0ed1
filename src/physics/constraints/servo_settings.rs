//! Servo and motor goal clamping.

use crate::utilities::wide::WideFloat;

/// Limits on how a servo pursues its position target.
#[repr(C)]
#[derive(Clone, Copy, Debug)]
pub struct ServoSettings {
    /// Largest speed the servo will request.
    pub maximum_speed: f32,
    /// Speed the servo requests even for tiny errors, for snappy arrival.
    pub base_speed: f32,
    /// Largest force the servo can apply.
    pub maximum_force: f32,
}

impl ServoSettings {
    pub fn new(maximum_speed: f32, base_speed: f32, maximum_force: f32) -> Self {
        debug_assert!(maximum_speed >= 0.0 && base_speed >= 0.0 && maximum_force >= 0.0);
        Self {
            maximum_speed,
            base_speed,
            maximum_force,
        }
    }

    /// Unbounded speed and force.
    pub fn rigid() -> Self {
        Self::new(f32::MAX, 0.0, f32::MAX)
    }
}

impl Default for ServoSettings {
    fn default() -> Self {
        Self::rigid()
    }
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Default)]
pub struct ServoSettingsWide {
    pub maximum_speed: WideFloat,
    pub base_speed: WideFloat,
    pub maximum_force: WideFloat,
}

impl ServoSettingsWide {
    #[inline(always)]
    pub fn write_slot(&mut self, settings: &ServoSettings, lane: usize) {
        self.maximum_speed.write_slot(settings.maximum_speed, lane);
        self.base_speed.write_slot(settings.base_speed, lane);
        self.maximum_force.write_slot(settings.maximum_force, lane);
    }

    #[inline(always)]
    pub fn read_slot(&self, lane: usize) -> ServoSettings {
        ServoSettings {
            maximum_speed: self.maximum_speed.read_slot(lane),
            base_speed: self.base_speed.read_slot(lane),
            maximum_force: self.maximum_force.read_slot(lane),
        }
    }

    /// Converts a signed scalar error into a clamped bias velocity.
    #[inline(always)]
    pub fn compute_clamped_bias_velocity(
        &self,
        error: WideFloat,
        position_error_to_velocity: WideFloat,
    ) -> WideFloat {
        let magnitude = error.abs() * position_error_to_velocity;
        let clamped = magnitude.max(self.base_speed).min(self.maximum_speed);
        // Zero error must produce zero bias regardless of base speed.
        let zero_error = error.equals(WideFloat::ZERO);
        let sign = error.less_than(WideFloat::ZERO).select(
            WideFloat::splat(-1.0),
            WideFloat::ONE,
        );
        zero_error.select(WideFloat::ZERO, clamped * sign)
    }

    /// The per-step accumulated impulse bound implied by the maximum force.
    #[inline(always)]
    pub fn maximum_impulse(&self, dt: f32) -> WideFloat {
        // Saturates instead of overflowing for effectively unbounded servos.
        let scaled = self.maximum_force * WideFloat::splat(dt);
        self.maximum_force
            .greater_than(WideFloat::splat(f32::MAX * 0.5))
            .select(WideFloat::splat(f32::MAX), scaled)
    }
}

/// Limits on how a motor pursues its velocity target.
#[repr(C)]
#[derive(Clone, Copy, Debug)]
pub struct MotorSettings {
    pub maximum_force: f32,
    /// Softness of the velocity constraint; higher values let the motor lag
    /// its target smoothly.
    pub softness: f32,
}

impl MotorSettings {
    pub fn new(maximum_force: f32, softness: f32) -> Self {
        debug_assert!(maximum_force >= 0.0 && softness >= 0.0);
        Self {
            maximum_force,
            softness,
        }
    }
}

impl Default for MotorSettings {
    fn default() -> Self {
        Self::new(f32::MAX, 0.0)
    }
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Default)]
pub struct MotorSettingsWide {
    pub maximum_force: WideFloat,
    pub softness: WideFloat,
}

impl MotorSettingsWide {
    #[inline(always)]
    pub fn write_slot(&mut self, settings: &MotorSettings, lane: usize) {
        self.maximum_force.write_slot(settings.maximum_force, lane);
        self.softness.write_slot(settings.softness, lane);
    }

    #[inline(always)]
    pub fn read_slot(&self, lane: usize) -> MotorSettings {
        MotorSettings {
            maximum_force: self.maximum_force.read_slot(lane),
            softness: self.softness.read_slot(lane),
        }
    }

    /// Derives effective mass and impulse decay scales from the softness.
    #[inline(always)]
    pub fn compute_softness(&self, inverse_dt: f32) -> (WideFloat, WideFloat) {
        let softened = self.softness * WideFloat::splat(inverse_dt);
        let effective_mass_cfm_scale = WideFloat::ONE / (WideFloat::ONE + softened);
        let softness_impulse_scale = softened * effective_mass_cfm_scale;
        (effective_mass_cfm_scale, softness_impulse_scale)
    }

    #[inline(always)]
    pub fn maximum_impulse(&self, dt: f32) -> WideFloat {
        let scaled = self.maximum_force * WideFloat::splat(dt);
        self.maximum_force
            .greater_than(WideFloat::splat(f32::MAX * 0.5))
            .select(WideFloat::splat(f32::MAX), scaled)
    }
}
