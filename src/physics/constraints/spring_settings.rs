//! Implicit spring parameterization shared by soft constraints.

use crate::utilities::wide::WideFloat;

/// Scalar spring description: undamped frequency and damping ratio.
#[repr(C)]
#[derive(Clone, Copy, Debug)]
pub struct SpringSettings {
    /// Undamped oscillations per unit time, scaled by 2*pi.
    pub angular_frequency: f32,
    /// Twice the ratio of actual damping to critical damping.
    pub twice_damping_ratio: f32,
}

impl SpringSettings {
    /// * `frequency` - target undamped oscillations per unit of time.
    /// * `damping_ratio` - 0 undamped, 1 critically damped, >1 overdamped.
    pub fn new(frequency: f32, damping_ratio: f32) -> Self {
        let settings = Self {
            angular_frequency: frequency * (2.0 * std::f32::consts::PI),
            twice_damping_ratio: damping_ratio * 2.0,
        };
        debug_assert!(
            settings.angular_frequency > 0.0 && settings.twice_damping_ratio >= 0.0,
            "Spring settings require positive frequency and nonnegative damping ratio."
        );
        settings
    }

    pub fn frequency(&self) -> f32 {
        self.angular_frequency / (2.0 * std::f32::consts::PI)
    }

    pub fn damping_ratio(&self) -> f32 {
        self.twice_damping_ratio / 2.0
    }
}

impl Default for SpringSettings {
    fn default() -> Self {
        Self::new(30.0, 1.0)
    }
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Default)]
pub struct SpringSettingsWide {
    pub angular_frequency: WideFloat,
    pub twice_damping_ratio: WideFloat,
}

impl SpringSettingsWide {
    #[inline(always)]
    pub fn write_slot(&mut self, settings: &SpringSettings, lane: usize) {
        self.angular_frequency.write_slot(settings.angular_frequency, lane);
        self.twice_damping_ratio
            .write_slot(settings.twice_damping_ratio, lane);
    }

    #[inline(always)]
    pub fn read_slot(&self, lane: usize) -> SpringSettings {
        SpringSettings {
            angular_frequency: self.angular_frequency.read_slot(lane),
            twice_damping_ratio: self.twice_damping_ratio.read_slot(lane),
        }
    }

    /// Derives the implicit-spring solver coefficients for a timestep:
    /// the position error to bias velocity conversion, the scale applied to
    /// the effective mass (CFM), and the accumulated impulse decay.
    #[inline(always)]
    pub fn compute_springiness(&self, dt: f32) -> Springiness {
        let dt_wide = WideFloat::splat(dt);
        let frequency_dt = self.angular_frequency * dt_wide;
        let position_error_to_velocity =
            self.angular_frequency / (frequency_dt + self.twice_damping_ratio);
        let extra = WideFloat::ONE / (frequency_dt * (frequency_dt + self.twice_damping_ratio));
        let effective_mass_cfm_scale = WideFloat::ONE / (WideFloat::ONE + extra);
        Springiness {
            position_error_to_velocity,
            effective_mass_cfm_scale,
            softness_impulse_scale: extra * effective_mass_cfm_scale,
        }
    }
}

#[derive(Clone, Copy, Debug)]
pub struct Springiness {
    pub position_error_to_velocity: WideFloat,
    pub effective_mass_cfm_scale: WideFloat,
    pub softness_impulse_scale: WideFloat,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stiffer_springs_convert_more_error_to_velocity() {
        let soft = {
            let mut wide = SpringSettingsWide::default();
            wide.write_slot(&SpringSettings::new(5.0, 1.0), 0);
            wide.compute_springiness(1.0 / 60.0)
        };
        let stiff = {
            let mut wide = SpringSettingsWide::default();
            wide.write_slot(&SpringSettings::new(60.0, 1.0), 0);
            wide.compute_springiness(1.0 / 60.0)
        };
        assert!(
            stiff.position_error_to_velocity.read_slot(0)
                > soft.position_error_to_velocity.read_slot(0)
        );
        // Softness decays accumulated impulses; stiffer springs decay less.
        assert!(
            stiff.softness_impulse_scale.read_slot(0) < soft.softness_impulse_scale.read_slot(0)
        );
        // The CFM scale always stays in (0, 1).
        let cfm = stiff.effective_mass_cfm_scale.read_slot(0);
        assert!(cfm > 0.0 && cfm < 1.0);
    }
}
