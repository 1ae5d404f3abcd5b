use ultralytics_inference as ul;

/// A single box reported by the detector.
#[derive(Debug, Clone, PartialEq)]
pub struct Detection {
    /// Box corners in pixels: `[x1, y1, x2, y2]`.
    pub xyxy: [f32; 4],
    pub class_id: usize,
    pub class_name: String,
    pub confidence: f32,
}

/// Detection result of one inference call on one frame.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Detections {
    items: Vec<Detection>,
}

impl Detections {
    pub fn new(items: Vec<Detection>) -> Self {
        Self { items }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Detection> {
        self.items.iter()
    }

    /// Keep only the boxes whose confidence reaches `conf`.
    pub fn above(self, conf: f32) -> Self {
        Self {
            items: self
                .items
                .into_iter()
                .filter(|d| d.confidence >= conf)
                .collect(),
        }
    }
}

impl From<&ul::Results> for Detections {
    fn from(result: &ul::Results) -> Self {
        let boxes = match result.boxes.as_ref() {
            Some(b) => b,
            None => return Self::default(),
        };

        let xyxy = boxes.xyxy();
        let conf = boxes.conf();
        let cls = boxes.cls();

        let items = (0..boxes.len())
            .map(|i| {
                let class_id = cls[i] as usize;
                let class_name = result
                    .names
                    .get(&class_id)
                    .cloned()
                    .unwrap_or_else(|| "object".to_string());
                Detection {
                    xyxy: [xyxy[[i, 0]], xyxy[[i, 1]], xyxy[[i, 2]], xyxy[[i, 3]]],
                    class_id,
                    class_name,
                    confidence: conf[i],
                }
            })
            .collect();

        Self { items }
    }
}
