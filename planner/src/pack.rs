use crate::keys::LoaderId;
use itertools::izip;

/// Methods newly instrumented since the last drain, packed as the parallel
/// arrays the agent wire layer expects.
#[derive(Debug, Default)]
pub struct InstrumentedMethods {
    pub class_names: Vec<String>,
    pub loader_ids: Vec<LoaderId>,
    pub method_indices: Vec<u16>,
    pub method_infos: Vec<Vec<u8>>,
}

impl InstrumentedMethods {
    pub fn len(&self) -> usize {
        self.method_indices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.method_indices.is_empty()
    }

    pub(crate) fn push(
        &mut self,
        class_name: String,
        loader: LoaderId,
        method_idx: u16,
        method_info: Vec<u8>,
    ) {
        self.class_names.push(class_name);
        self.loader_ids.push(loader);
        self.method_indices.push(method_idx);
        self.method_infos.push(method_info);
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, LoaderId, u16, &[u8])> + '_ {
        izip!(
            &self.class_names,
            &self.loader_ids,
            &self.method_indices,
            &self.method_infos
        )
        .map(|(name, loader, idx, info)| (name.as_str(), *loader, *idx, info.as_slice()))
    }
}
