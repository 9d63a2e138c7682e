//! Size-bounded payload bucketing.
//!
//! Greedy single pass: an object joins the open bucket while the running
//! size stays within the ceiling, otherwise it opens the next bucket. An
//! object larger than the ceiling travels alone. Order is preserved since
//! remote ids come back positionally.

use layersync_core::types::PortableObject;

use crate::error::SyncError;

/// One upload call's worth of objects.
#[derive(Debug, Clone, PartialEq)]
pub struct Bucket {
    pub objects: Vec<PortableObject>,
    /// Sum of the serialized sizes of `objects`.
    pub bytes: usize,
}

/// Serialized JSON size of an object, as it goes over the wire.
pub fn serialized_size(object: &PortableObject) -> Result<usize, SyncError> {
    Ok(serde_json::to_vec(object)?.len())
}

/// Bucket portable objects under `max_bytes`.
pub fn bucket(objects: Vec<PortableObject>, max_bytes: usize) -> Result<Vec<Bucket>, SyncError> {
    let sized = objects
        .into_iter()
        .map(|object| serialized_size(&object).map(|size| (object, size)))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(pack(sized, max_bytes)
        .into_iter()
        .map(|(objects, bytes)| Bucket { objects, bytes })
        .collect())
}

/// Greedy packing of pre-sized items. Returns each group with its total size.
pub fn pack<T>(items: impl IntoIterator<Item = (T, usize)>, max_bytes: usize) -> Vec<(Vec<T>, usize)> {
    let mut groups = Vec::new();
    let mut current = Vec::new();
    let mut running = 0usize;
    for (item, size) in items {
        if !current.is_empty() && running.saturating_add(size) > max_bytes {
            groups.push((std::mem::take(&mut current), running));
            running = 0;
        }
        current.push(item);
        running = running.saturating_add(size);
    }
    if !current.is_empty() {
        groups.push((current, running));
    }
    groups
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn three_objects_against_a_500k_ceiling() {
        let groups = pack([("obj1", 300_000), ("obj2", 300_000), ("obj3", 50_000)], 500_000);
        let names: Vec<Vec<&str>> = groups.into_iter().map(|(g, _)| g).collect();
        assert_eq!(names, vec![vec!["obj1"], vec!["obj2", "obj3"]]);
    }

    #[test]
    fn oversize_object_goes_alone() {
        let groups = pack([(1, 10), (2, 900), (3, 10)], 100);
        let sizes: Vec<usize> = groups.iter().map(|(_, s)| *s).collect();
        assert_eq!(sizes, [10, 900, 10]);
    }

    #[test]
    fn buckets_stay_under_ceiling_and_keep_order() {
        let inputs: [&[usize]; 4] = [
            &[],
            &[100, 100, 100, 100],
            &[40, 70, 30, 250, 1, 99, 100],
            &[101, 101, 1],
        ];
        for sizes in inputs {
            let items: Vec<(usize, usize)> = sizes.iter().copied().enumerate().collect();
            let groups = pack(items, 100);
            for (group, total) in &groups {
                assert!(*total <= 100 || group.len() == 1, "{sizes:?}: {groups:?}");
            }
            let flattened: Vec<usize> = groups.into_iter().flat_map(|(g, _)| g).collect();
            assert_eq!(flattened, (0..sizes.len()).collect::<Vec<_>>());
        }
    }

    #[test]
    fn bucket_measures_serialized_objects() {
        let objects: Vec<PortableObject> = (0..4)
            .map(|i| PortableObject::new("Blob", json!({ "data": "x".repeat(200), "i": i })))
            .collect();
        let one = serialized_size(&objects[0]).unwrap();
        let buckets = bucket(objects, one * 2).unwrap();
        assert_eq!(buckets.len(), 2);
        assert!(buckets.iter().all(|b| b.objects.len() == 2 && b.bytes <= one * 2));
    }
}
