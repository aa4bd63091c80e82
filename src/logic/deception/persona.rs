//! Fabricated service identities

use rand::seq::SliceRandom;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Persona {
    pub key: &'static str,
    pub prompt: &'static str,
}

pub const PERSONAS: [Persona; 3] = [
    Persona {
        key: "legacy_erp",
        prompt: "You are a legacy ERP system (v3.2) from 2008. OS: SunOS 5.10. Sticky and authentic.",
    },
    Persona {
        key: "devops_staging",
        prompt: "You are a neglected DevOps staging server. OS: Ubuntu 18.04 LTS. Many temp files.",
    },
    Persona {
        key: "iot_cam",
        prompt: "You are a cheap IP camera web interface. Firmware v1.0. Broken English.",
    },
];

impl Persona {
    /// Uniform pick
    pub fn random() -> Persona {
        *PERSONAS.choose(&mut rand::thread_rng()).unwrap_or(&PERSONAS[0])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_random_is_known() {
        for _ in 0..20 {
            let p = Persona::random();
            assert!(PERSONAS.contains(&p));
        }
    }
}
