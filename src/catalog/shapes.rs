use serde::{Deserialize, Serialize};

/// Either a fixed value or an inclusive range for flexible shapes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ShapeRange {
    Fixed(u32),
    Flexible { min: u32, max: u32 },
}

impl ShapeRange {
    pub fn contains(&self, value: u32) -> bool {
        match self {
            ShapeRange::Fixed(v) => *v == value,
            ShapeRange::Flexible { min, max } => (*min..=*max).contains(&value),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComputeShape {
    pub name: String,
    pub ocpus: ShapeRange,
    pub memory_in_gbs: ShapeRange,
    pub processor_description: String,
}

impl ComputeShape {
    pub fn is_flexible(&self) -> bool {
        matches!(self.ocpus, ShapeRange::Flexible { .. })
    }
}

pub(crate) fn builtin_shapes() -> Vec<ComputeShape> {
    vec![
        ComputeShape {
            name: "VM.Standard.E4.Flex".to_string(),
            ocpus: ShapeRange::Flexible { min: 1, max: 64 },
            memory_in_gbs: ShapeRange::Flexible { min: 16, max: 1024 },
            processor_description: "2.55 GHz AMD EPYC 7J13".to_string(),
        },
        ComputeShape {
            name: "VM.Standard.E3.Flex".to_string(),
            ocpus: ShapeRange::Flexible { min: 1, max: 64 },
            memory_in_gbs: ShapeRange::Flexible { min: 16, max: 1024 },
            processor_description: "2.25 GHz AMD EPYC 7742".to_string(),
        },
        ComputeShape {
            name: "VM.Standard.A1.Flex".to_string(),
            ocpus: ShapeRange::Flexible { min: 1, max: 80 },
            memory_in_gbs: ShapeRange::Flexible { min: 6, max: 512 },
            processor_description: "Ampere Altra Q80-30".to_string(),
        },
        ComputeShape {
            name: "VM.Standard2.1".to_string(),
            ocpus: ShapeRange::Fixed(1),
            memory_in_gbs: ShapeRange::Fixed(15),
            processor_description: "2.0 GHz Intel Xeon Platinum 8167M".to_string(),
        },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flexible_ranges() {
        let shapes = builtin_shapes();
        let e4 = &shapes[0];
        assert!(e4.is_flexible());
        assert!(e4.ocpus.contains(4));
        assert!(!e4.ocpus.contains(65));
        assert!(!shapes[3].is_flexible());
    }

    #[test]
    fn test_untagged_serialization() {
        let json = serde_json::to_value(&builtin_shapes()[3]).unwrap();
        assert_eq!(json["ocpus"], 1);
        let json = serde_json::to_value(&builtin_shapes()[0]).unwrap();
        assert_eq!(json["ocpus"]["max"], 64);
    }
}
