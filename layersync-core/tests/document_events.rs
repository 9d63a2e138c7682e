use std::sync::{Arc, Mutex};

use layersync_core::memory::{point, MemoryDocument};
use layersync_core::{Color, Document, DocumentEvent, DocumentEventSource, StreamId, TrackingTag};

fn recorder(doc: &MemoryDocument) -> (Arc<Mutex<Vec<DocumentEvent>>>, layersync_core::Subscription) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    let subscription = doc.subscribe(Box::new(move |event| {
        sink.lock().expect("sink").push(event.clone());
    }));
    (seen, subscription)
}

#[test]
fn tagging_reports_old_and_new_attributes() {
    let doc = MemoryDocument::new("tags.3dm");
    let layer = doc.ensure_layer_path("A", Color::BLACK).expect("layer");
    let id = doc.add_object(point("p", 0.0, 0.0), layer).expect("object");
    let tag = TrackingTag::for_stream(&StreamId::from("stream-0007"));
    let (seen, _subscription) = recorder(&doc);

    doc.set_user_string(&id, tag.key(), Some(tag.value())).expect("tag");
    doc.set_user_string(&id, tag.key(), None).expect("untag");

    let seen = seen.lock().expect("seen");
    assert_eq!(seen.len(), 2);
    let DocumentEvent::AttributesModified { old, new, .. } = &seen[0] else {
        panic!("expected attribute edit, got {:?}", seen[0]);
    };
    assert!(!tag.matches(old));
    assert!(tag.matches(new));
    let DocumentEvent::AttributesModified { old, new, .. } = &seen[1] else {
        panic!("expected attribute edit, got {:?}", seen[1]);
    };
    assert!(tag.matches(old));
    assert!(!tag.matches(new));
    assert!(doc.tagged_objects(&tag).is_empty());
}

#[test]
fn layer_lookup_by_path_and_id_agree() {
    let doc = MemoryDocument::new("layers.3dm");
    let leaf = doc
        .ensure_layer_path("Site::Walls::Outer", Color::rgb(9, 9, 9))
        .expect("layers");

    assert_eq!(doc.find_layer_by_path("Site::Walls::Outer"), Some(leaf));
    assert_eq!(doc.layer_full_path(leaf).as_deref(), Some("Site::Walls::Outer"));
    let layer = doc.layer(leaf).expect("leaf layer");
    assert_eq!(doc.find_layer_by_id(&layer.id), Some(leaf));
    assert_eq!(layer.color, Color::rgb(9, 9, 9));

    let walls = doc.find_layer_by_path("Site::Walls").expect("walls");
    assert_eq!(doc.child_layers(walls), [leaf]);
    assert_eq!(doc.find_layer_by_path("Walls"), None);
}

#[test]
fn layer_changes_are_announced() {
    let doc = MemoryDocument::new("announce.3dm");
    let (seen, subscription) = recorder(&doc);
    let root = doc.ensure_layer_path("Root::Child", Color::BLACK).expect("layers");
    doc.purge_layer(doc.find_layer_by_path("Root").expect("root")).expect("purge");
    drop(subscription);
    doc.ensure_layer_path("After", Color::BLACK).expect("layer");

    let kinds: Vec<&str> = seen.lock().expect("seen").iter().map(DocumentEvent::kind).collect();
    assert_eq!(kinds, ["layer-table-changed"; 3]);
    assert!(doc.layer(root).is_none());
}
