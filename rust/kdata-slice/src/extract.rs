//! Extraction of reachable subgraphs and cloning.
//!
//! Traversal is schema driven: entities follow the attributes their schema
//! declares, objects follow their `__schema__`, lists and dicts follow the item,
//! key and value schemas. ANY data has no schema to follow, so every attribute,
//! list item and dict entry of its ItemIds is visited.

use ahash::{AHashMap, AHashSet};
use kdata_bag::{DataBag, DictEntries, MergeOptions};
use kdata_common::Result;
use kdata_types::id_hash::IdHashSet;
use kdata_types::{DataItem, ItemId, Schema};
use xxhash_rust::xxh3::Xxh3;

use crate::context::Context;
use crate::schema_ops::{
    ITEMS_ATTR, KEYS_ATTR, SCHEMA_ATTR, StructKind, VALUES_ATTR, is_reserved_attr, struct_kind,
};
use crate::slice::DataSlice;

enum Task {
    Schema(ItemId),
    Value(ItemId, Schema),
}

/// The schema of a reserved attribute (`__items__`, `__keys__`, ...) of `schema`.
fn reserved_schema(bag: &DataBag, schema: ItemId, attr: &str) -> Schema {
    Schema::from_item(&bag.get_attr(schema, attr)).unwrap_or(Schema::ANY)
}

/// Declared, non-reserved attributes of an entity schema with their schemas.
fn declared_attrs(bag: &DataBag, schema: ItemId) -> Vec<(String, Schema)> {
    bag.get_attr_names(schema)
        .into_iter()
        .filter(|name| !is_reserved_attr(name))
        .filter_map(|name| {
            let attr_schema = Schema::from_item(&bag.get_attr(schema, &name)).ok()?;
            Some((name, attr_schema))
        })
        .collect()
}

/// Copies everything reachable from a set of roots into a fresh bag.
struct Extractor<'a> {
    source: &'a DataBag,
    target: DataBag,
    visited_schemas: IdHashSet<ItemId>,
    visited: AHashSet<(ItemId, Schema)>,
    pending: Vec<Task>,
}

impl<'a> Extractor<'a> {
    fn new(source: &'a DataBag) -> Extractor<'a> {
        Extractor {
            source,
            target: DataBag::new(),
            visited_schemas: IdHashSet::default(),
            visited: AHashSet::new(),
            pending: Vec::new(),
        }
    }

    fn push_schema(&mut self, schema: Schema) {
        if let Schema::Struct(id) = schema {
            self.pending.push(Task::Schema(id));
        }
    }

    fn push_item(&mut self, item: &DataItem, schema: Schema) {
        let Some(id) = item.as_item_id() else {
            return;
        };
        if id.is_schema() {
            self.pending.push(Task::Schema(id));
        } else {
            self.pending.push(Task::Value(id, schema));
        }
    }

    fn run(mut self) -> Result<DataBag> {
        while let Some(task) = self.pending.pop() {
            match task {
                Task::Schema(id) => self.copy_schema(id)?,
                Task::Value(id, schema) => self.copy_value(id, schema)?,
            }
        }
        Ok(self.target)
    }

    fn copy_schema(&mut self, schema: ItemId) -> Result<()> {
        if !self.visited_schemas.insert(schema) {
            return Ok(());
        }
        for name in self.source.get_attr_names(schema) {
            let attr_schema = self.source.get_attr(schema, &name);
            self.target.set_attr(schema, &name, attr_schema.clone())?;
            if let Some(id) = attr_schema.as_item_id() {
                self.pending.push(Task::Schema(id));
            }
        }
        Ok(())
    }

    fn copy_value(&mut self, id: ItemId, schema: Schema) -> Result<()> {
        if !self.visited.insert((id, schema)) {
            return Ok(());
        }
        match schema {
            Schema::Struct(schema_id) => {
                self.pending.push(Task::Schema(schema_id));
                match struct_kind(Some(self.source), schema_id) {
                    StructKind::List => {
                        let item_schema = reserved_schema(self.source, schema_id, ITEMS_ATTR);
                        self.copy_list(id, item_schema)?;
                    }
                    StructKind::Dict => {
                        let key_schema = reserved_schema(self.source, schema_id, KEYS_ATTR);
                        let value_schema = reserved_schema(self.source, schema_id, VALUES_ATTR);
                        self.copy_dict(id, key_schema, value_schema)?;
                    }
                    StructKind::Entity => {
                        for (name, attr_schema) in declared_attrs(self.source, schema_id) {
                            let value = self.source.get_attr(id, &name);
                            if value.is_present() {
                                self.target.set_attr(id, &name, value.clone())?;
                                self.push_item(&value, attr_schema);
                            }
                        }
                    }
                }
            }
            Schema::OBJECT => {
                let own_schema = self.source.get_attr(id, SCHEMA_ATTR);
                if let Ok(schema @ Schema::Struct(_)) = Schema::from_item(&own_schema) {
                    self.target.set_attr(id, SCHEMA_ATTR, own_schema)?;
                    self.pending.push(Task::Value(id, schema));
                }
            }
            Schema::ANY => {
                for name in self.source.get_attr_names(id) {
                    let value = self.source.get_attr(id, &name);
                    self.target.set_attr(id, &name, value.clone())?;
                    self.push_item(&value, Schema::ANY);
                }
                self.copy_list(id, Schema::ANY)?;
                self.copy_dict(id, Schema::ANY, Schema::ANY)?;
            }
            _ => {}
        }
        Ok(())
    }

    fn copy_list(&mut self, list: ItemId, item_schema: Schema) -> Result<()> {
        if let Some(items) = self.source.get_list(list) {
            for item in items.iter() {
                self.push_item(item, item_schema);
            }
            self.target.set_list(list, (*items).clone())?;
        }
        Ok(())
    }

    fn copy_dict(&mut self, dict: ItemId, key_schema: Schema, value_schema: Schema) -> Result<()> {
        if let Some(entries) = self.source.get_dict(dict) {
            for (key, value) in entries.iter() {
                self.push_item(key, key_schema);
                self.push_item(value, value_schema);
            }
            self.target.set_dict(dict, (*entries).clone())?;
        }
        Ok(())
    }
}

/// A value slot of a node being deep-cloned: either resolved, or a reference to
/// an ancestor whose id is not known yet.
#[derive(Clone)]
enum Slot {
    Item(DataItem),
    Back(ItemId, Schema),
}

#[derive(Default)]
struct NodeContent {
    schema_attr: Option<DataItem>,
    attrs: Vec<(String, Slot)>,
    list: Option<Vec<Slot>>,
    dict: Option<Vec<(Slot, Slot)>>,
}

/// Re-identifies a reachable subgraph with ids derived from content.
///
/// Ids are computed bottom-up: the id of a node hashes its kind, schema and the
/// new ids of its children. A child that is still on the traversal stack (a cycle)
/// contributes its stack distance instead, and the reference is patched once the
/// ancestor's id is known.
///
/// A node whose subtree refers back to a strict ancestor is not self-contained, so
/// its id also hashes its source id and never collapses with another node.
struct DeepCloner<'a> {
    source: &'a DataBag,
    schemas: Extractor<'a>,
    ids: AHashMap<(ItemId, Schema), ItemId>,
    stack: Vec<(ItemId, Schema)>,
    /// Per stack frame, the lowest stack index referenced from its subtree.
    lowest_back: Vec<usize>,
    nodes: Vec<(ItemId, NodeContent)>,
}

impl<'a> DeepCloner<'a> {
    fn new(source: &'a DataBag) -> DeepCloner<'a> {
        DeepCloner {
            source,
            schemas: Extractor::new(source),
            ids: AHashMap::new(),
            stack: Vec::new(),
            lowest_back: Vec::new(),
            nodes: Vec::new(),
        }
    }

    fn clone_slot(&mut self, item: &DataItem, schema: Schema, hasher: &mut Xxh3) -> Slot {
        let id = match item.as_item_id() {
            Some(id) if !id.is_schema() => id,
            _ => {
                if let Some(id) = item.as_item_id() {
                    self.schemas.pending.push(Task::Schema(id));
                }
                item.fingerprint(hasher);
                return Slot::Item(item.clone());
            }
        };
        let key = (id, schema);
        if let Some(depth) = self.stack.iter().rev().position(|k| *k == key) {
            hasher.update(b"back");
            hasher.update(&(depth as u64).to_le_bytes());
            let index = self.stack.len() - 1 - depth;
            if let Some(lowest) = self.lowest_back.last_mut() {
                *lowest = (*lowest).min(index);
            }
            return Slot::Back(id, schema);
        }
        let new_id = self.clone_id(id, schema);
        let new_item = DataItem::ItemId(new_id);
        new_item.fingerprint(hasher);
        Slot::Item(new_item)
    }

    fn clone_id(&mut self, id: ItemId, schema: Schema) -> ItemId {
        let key = (id, schema);
        if let Some(new_id) = self.ids.get(&key) {
            return *new_id;
        }
        let index = self.stack.len();
        self.stack.push(key);
        self.lowest_back.push(usize::MAX);
        let mut hasher = Xxh3::new();
        hasher.update(&[id.kind() as u8]);
        schema.to_item().fingerprint(&mut hasher);
        let mut content = NodeContent::default();

        let mut effective = schema;
        if schema == Schema::OBJECT {
            let own_schema = self.source.get_attr(id, SCHEMA_ATTR);
            own_schema.fingerprint(&mut hasher);
            if let Ok(resolved @ Schema::Struct(_)) = Schema::from_item(&own_schema) {
                effective = resolved;
                content.schema_attr = Some(own_schema);
            }
        }
        self.schemas.push_schema(effective);

        match effective {
            Schema::Struct(schema_id) => match struct_kind(Some(self.source), schema_id) {
                StructKind::List => {
                    let item_schema = reserved_schema(self.source, schema_id, ITEMS_ATTR);
                    content.list = self.clone_list(id, item_schema, &mut hasher);
                }
                StructKind::Dict => {
                    let key_schema = reserved_schema(self.source, schema_id, KEYS_ATTR);
                    let value_schema = reserved_schema(self.source, schema_id, VALUES_ATTR);
                    content.dict = self.clone_dict(id, key_schema, value_schema, &mut hasher);
                }
                StructKind::Entity => {
                    for (name, attr_schema) in declared_attrs(self.source, schema_id) {
                        let value = self.source.get_attr(id, &name);
                        if value.is_present() {
                            hasher.update(name.as_bytes());
                            let slot = self.clone_slot(&value, attr_schema, &mut hasher);
                            content.attrs.push((name, slot));
                        }
                    }
                }
            },
            Schema::ANY => {
                for name in self.source.get_attr_names(id) {
                    let value = self.source.get_attr(id, &name);
                    hasher.update(name.as_bytes());
                    let slot = self.clone_slot(&value, Schema::ANY, &mut hasher);
                    content.attrs.push((name, slot));
                }
                content.list = self.clone_list(id, Schema::ANY, &mut hasher);
                content.dict = self.clone_dict(id, Schema::ANY, Schema::ANY, &mut hasher);
            }
            _ => {}
        }

        self.stack.pop();
        let lowest = self.lowest_back.pop().unwrap_or(usize::MAX);
        if lowest < index {
            DataItem::ItemId(id).fingerprint(&mut hasher);
            if let Some(parent) = self.lowest_back.last_mut() {
                *parent = (*parent).min(lowest);
            }
        }
        let new_id = ItemId::derived(id.kind(), hasher.digest128());
        self.ids.insert(key, new_id);
        self.nodes.push((new_id, content));
        new_id
    }

    fn clone_list(&mut self, list: ItemId, schema: Schema, hasher: &mut Xxh3) -> Option<Vec<Slot>> {
        let items = self.source.get_list(list)?;
        hasher.update(b"list");
        Some(
            items
                .iter()
                .map(|item| self.clone_slot(item, schema, hasher))
                .collect(),
        )
    }

    fn clone_dict(
        &mut self,
        dict: ItemId,
        key_schema: Schema,
        value_schema: Schema,
        hasher: &mut Xxh3,
    ) -> Option<Vec<(Slot, Slot)>> {
        let entries = self.source.get_dict(dict)?;
        hasher.update(b"dict");
        Some(
            entries
                .iter()
                .map(|(key, value)| {
                    let key = self.clone_slot(key, key_schema, hasher);
                    let value = self.clone_slot(value, value_schema, hasher);
                    (key, value)
                })
                .collect(),
        )
    }

    /// Writes every cloned node and the schemas they use into one bag.
    fn finish(self) -> Result<DataBag> {
        let DeepCloner {
            schemas, ids, nodes, ..
        } = self;
        let resolve = |slot: &Slot| match slot {
            Slot::Item(item) => item.clone(),
            Slot::Back(id, schema) => ids
                .get(&(*id, *schema))
                .map_or(DataItem::Missing, |new_id| DataItem::ItemId(*new_id)),
        };
        let target = schemas.run()?;
        for (id, content) in &nodes {
            if let Some(schema) = &content.schema_attr {
                target.set_attr(*id, SCHEMA_ATTR, schema.clone())?;
            }
            for (name, slot) in &content.attrs {
                target.set_attr(*id, name, resolve(slot))?;
            }
            if let Some(list) = &content.list {
                target.set_list(*id, list.iter().map(resolve).collect())?;
            }
            if let Some(dict) = &content.dict {
                let entries: DictEntries = dict
                    .iter()
                    .map(|(k, v)| (resolve(k), resolve(v)))
                    .collect();
                target.set_dict(*id, entries)?;
            }
        }
        Ok(target)
    }
}

impl DataSlice {
    /// Copies the part of the bag reachable from this slice into a new frozen bag.
    pub fn extract_bag(&self) -> Result<DataBag> {
        let source = self.require_bag("extract")?;
        let mut extractor = Extractor::new(source);
        extractor.push_schema(self.schema());
        for item in self.items() {
            extractor.push_item(item, self.schema());
        }
        let bag = extractor.run()?;
        log::debug!(
            "extracted {} triples of bag {} into bag {}",
            bag.approx_triple_count(),
            source.id(),
            bag.id()
        );
        bag.freeze();
        Ok(bag)
    }

    /// The same slice attached to a bag holding only the reachable data.
    pub fn extract(&self) -> Result<DataSlice> {
        Ok(self.with_bag(self.extract_bag()?))
    }

    /// Merges the data reachable from this slice into `bag`.
    pub(crate) fn adopt_into(&self, bag: &DataBag) -> Result<()> {
        match self.bag() {
            Some(own) if !own.is_same(bag) => {
                let extracted = self.extract_bag()?;
                log::trace!("adopting bag {} into bag {}", own.id(), bag.id());
                bag.merge_inplace(&extracted, MergeOptions::default())
            }
            _ => Ok(()),
        }
    }

    /// Allocates new ids for the ItemIds of this slice and copies their own
    /// triples (attributes, list items, dict entries, `__schema__`) from `source`
    /// into `target`. Returns the re-identified data.
    fn copy_top_level(&self, ctx: &Context, source: &DataBag, target: &DataBag) -> Result<Vec<DataItem>> {
        let schema = self.schema();
        let mut renamed: AHashMap<ItemId, ItemId> = AHashMap::new();
        let mut data = Vec::with_capacity(self.size());
        for item in self.items() {
            let Some(id) = item.as_item_id().filter(|id| !id.is_schema()) else {
                data.push(item.clone());
                continue;
            };
            let new_id = *renamed.entry(id).or_insert_with(|| ctx.allocate(id.kind()));
            data.push(DataItem::ItemId(new_id));

            let mut effective = schema;
            if schema == Schema::OBJECT {
                let own_schema = source.get_attr(id, SCHEMA_ATTR);
                target.set_attr(new_id, SCHEMA_ATTR, own_schema.clone())?;
                effective = Schema::from_item(&own_schema).unwrap_or(Schema::NONE);
            }
            let names = match effective {
                Schema::Struct(schema_id) => declared_attrs(source, schema_id)
                    .into_iter()
                    .map(|(name, _)| name)
                    .collect(),
                Schema::ANY => source.get_attr_names(id),
                _ => Vec::new(),
            };
            for name in names {
                target.set_attr(new_id, &name, source.get_attr(id, &name))?;
            }
            if let Some(items) = source.get_list(id) {
                target.set_list(new_id, (*items).clone())?;
            }
            if let Some(entries) = source.get_dict(id) {
                target.set_dict(new_id, (*entries).clone())?;
            }
        }
        Ok(data)
    }

    /// Copies the reachable data and gives the top-level items new ItemIds.
    ///
    /// Nested items keep their ids.
    pub fn fresh_clone(&self, ctx: &Context) -> Result<DataSlice> {
        let extracted = self.extract_bag()?;
        let target = extracted.fork(true);
        let data = self.copy_top_level(ctx, &extracted, &target)?;
        target.freeze();
        Ok(self.with_bag(target).with_data(data.into(), self.schema()))
    }

    /// Gives the top-level items new ItemIds and copies only their own triples and
    /// the schema into a new bag; nested values are referenced, not copied.
    pub fn shallow_clone(&self, ctx: &Context) -> Result<DataSlice> {
        let source = self.require_bag("shallow_clone")?;
        let target = DataBag::new();
        let mut schemas = Extractor::new(source);
        schemas.push_schema(self.schema());
        let schema_bag = schemas.run()?;
        target.merge_inplace(&schema_bag, MergeOptions::default())?;
        let data = self.copy_top_level(ctx, source, &target)?;
        target.freeze();
        Ok(self.with_bag(target).with_data(data.into(), self.schema()))
    }

    /// Copies the reachable data into a new bag where every ItemId is replaced by
    /// an id derived from its content, so structurally identical subgraphs share
    /// identity.
    pub fn deep_clone(&self) -> Result<DataSlice> {
        let source = self.require_bag("deep_clone")?;
        let mut cloner = DeepCloner::new(source);
        cloner.schemas.push_schema(self.schema());
        let data = self
            .items()
            .iter()
            .map(|item| match item.as_item_id() {
                Some(id) if !id.is_schema() => DataItem::ItemId(cloner.clone_id(id, self.schema())),
                _ => {
                    if let Some(id) = item.as_item_id() {
                        cloner.schemas.pending.push(Task::Schema(id));
                    }
                    item.clone()
                }
            })
            .collect::<Vec<_>>();
        let target = cloner.finish()?;
        log::debug!(
            "deep-cloned {} items of bag {} into bag {}",
            self.present_count(),
            source.id(),
            target.id()
        );
        target.freeze();
        Ok(self.with_bag(target).with_data(data.into(), self.schema()))
    }
}

#[cfg(test)]
mod tests {
    use kdata_shape::JaggedShape;

    use super::*;
    use crate::factories::{FactoryOptions, new_shaped, obj_shaped};

    fn init_logging() {
        env_logger::builder().is_test(true).try_init().ok();
    }

    fn entity(ctx: &Context, attrs: &[(&str, &DataSlice)]) -> DataSlice {
        new_shaped(ctx, JaggedShape::scalar(), attrs, &FactoryOptions::default()).unwrap()
    }

    fn id_of(ds: &DataSlice) -> ItemId {
        ds.items()[0].as_item_id().unwrap()
    }

    #[test]
    fn test_extract_is_minimal() {
        init_logging();
        let ctx = Context::with_seed(31);
        let child = entity(&ctx, &[("x", &DataSlice::from_item(1))]);
        let parent = entity(&ctx, &[("child", &child), ("y", &DataSlice::from_item(2))]);

        let nested = parent.get_attr("child").unwrap();
        let bag = nested.extract_bag().unwrap();
        assert!(!bag.is_mutable());
        assert_eq!(bag.get_attr(id_of(&child), "x"), DataItem::from(1));
        assert!(bag.get_attr_names(id_of(&parent)).is_empty());

        let extracted = parent.extract().unwrap();
        let x = extracted.get_attr("child").unwrap().get_attr("x").unwrap();
        assert_eq!(x.items(), &[DataItem::from(1)]);
    }

    #[test]
    fn test_extract_objects() {
        let ctx = Context::with_seed(32);
        let objects = obj_shaped(
            &ctx,
            JaggedShape::flat(2),
            &[("a", &DataSlice::from_values([1, 2]).unwrap())],
            &FactoryOptions::default(),
        )
        .unwrap();
        let extracted = objects.extract().unwrap();
        assert_eq!(
            extracted.get_attr("a").unwrap().items(),
            &[1.into(), DataItem::from(2)]
        );
    }

    #[test]
    fn test_fresh_clone() {
        let ctx = Context::with_seed(33);
        let child = entity(&ctx, &[("x", &DataSlice::from_item(1))]);
        let parent = entity(&ctx, &[("child", &child)]);

        let cloned = parent.fresh_clone(&ctx).unwrap();
        assert_ne!(id_of(&cloned), id_of(&parent));
        assert_eq!(cloned.schema(), parent.schema());
        let nested = cloned.get_attr("child").unwrap();
        assert_eq!(id_of(&nested), id_of(&child));
        assert_eq!(nested.get_attr("x").unwrap().items(), &[DataItem::from(1)]);
    }

    #[test]
    fn test_shallow_clone_copies_top_level_only() {
        let ctx = Context::with_seed(34);
        let child = entity(&ctx, &[("x", &DataSlice::from_item(1))]);
        let parent = entity(&ctx, &[("child", &child), ("y", &DataSlice::from_item(2))]);

        let cloned = parent.shallow_clone(&ctx).unwrap();
        assert_ne!(id_of(&cloned), id_of(&parent));
        assert_eq!(cloned.get_attr("y").unwrap().items(), &[DataItem::from(2)]);
        let bag = cloned.bag().unwrap();
        assert_eq!(
            bag.get_attr(id_of(&cloned), "child"),
            DataItem::ItemId(id_of(&child))
        );
        assert!(bag.get_attr(id_of(&child), "x").is_missing());
    }

    #[test]
    fn test_deep_clone_collapses_identical_entities() {
        let ctx = Context::with_seed(35);
        let twins = new_shaped(
            &ctx,
            JaggedShape::flat(2),
            &[("x", &DataSlice::from_item(1))],
            &FactoryOptions::default(),
        )
        .unwrap();
        assert_ne!(twins.items()[0], twins.items()[1]);

        let cloned = twins.deep_clone().unwrap();
        assert_eq!(cloned.items()[0], cloned.items()[1]);
        assert!(!twins.items().contains(&cloned.items()[0]));
        assert_eq!(cloned.get_attr("x").unwrap().items(), &[1.into(), DataItem::from(1)]);
        assert_eq!(twins.deep_clone().unwrap().items(), cloned.items());
    }

    #[test]
    fn test_deep_clone_keeps_distinct_back_references() {
        let ctx = Context::with_seed(37);
        let parents = new_shaped(
            &ctx,
            JaggedShape::flat(2),
            &[("x", &DataSlice::from_values([1, 2]).unwrap())],
            &FactoryOptions::default(),
        )
        .unwrap()
        .fork_bag();
        let children = new_shaped(
            &ctx,
            JaggedShape::flat(2),
            &[("y", &DataSlice::from_item(0))],
            &FactoryOptions::default(),
        )
        .unwrap();
        parents.set_attr("child", &children, false).unwrap();
        let children = parents.get_attr("child").unwrap();
        children.set_attr("parent", &parents, false).unwrap();

        let cloned = parents.deep_clone().unwrap();
        let cloned_children = cloned.get_attr("child").unwrap();
        assert_ne!(cloned_children.items()[0], cloned_children.items()[1]);
        let back = cloned_children.get_attr("parent").unwrap();
        assert_eq!(back.items(), cloned.items());
        assert_eq!(back.get_attr("x").unwrap().items(), &[1.into(), DataItem::from(2)]);
    }

    #[test]
    fn test_deep_clone_cycle() {
        init_logging();
        let ctx = Context::with_seed(36);
        let node = entity(&ctx, &[("x", &DataSlice::from_item(1))]).fork_bag();
        node.set_attr("next", &node, false).unwrap();

        let cloned = node.deep_clone().unwrap();
        assert_ne!(id_of(&cloned), id_of(&node));
        let next = cloned.get_attr("next").unwrap();
        assert_eq!(next.items(), cloned.items());
        assert_eq!(
            next.get_attr("next").unwrap().get_attr("x").unwrap().items(),
            &[DataItem::from(1)]
        );
    }
}
