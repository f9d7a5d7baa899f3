//! Attaching merged bags to slices.

use kdata_bag::DataBag;
use kdata_common::Result;

use crate::slice::DataSlice;

impl DataSlice {
    /// Attaches a bag in which this slice's own bag wins over `bags`, and each of
    /// `bags` wins over the ones after it.
    pub fn enriched(&self, bags: &[DataBag]) -> Result<DataSlice> {
        let all = self.bag().into_iter().chain(bags).cloned().collect::<Vec<_>>();
        self.with_composed(all, DataBag::enriched_bag)
    }

    /// Attaches a bag in which each of `bags` wins over the ones before it, and all
    /// of them win over this slice's own bag.
    pub fn updated(&self, bags: &[DataBag]) -> Result<DataSlice> {
        let all = self.bag().into_iter().chain(bags).cloned().collect::<Vec<_>>();
        self.with_composed(all, DataBag::updated_bag)
    }

    fn with_composed(
        &self,
        bags: Vec<DataBag>,
        compose: fn(&[DataBag]) -> Result<DataBag>,
    ) -> Result<DataSlice> {
        let bag = match bags.len() {
            0 => return Ok(self.clone()),
            1 => bags[0].frozen(),
            _ => compose(&bags)?,
        };
        Ok(self.with_bag(bag))
    }

    /// Attaches a single mutable bag holding everything visible through this slice's
    /// bag and its fallbacks.
    pub fn with_merged_bag(&self) -> Result<DataSlice> {
        let bag = self.require_bag("with_merged_bag")?;
        Ok(self.with_bag(bag.merge_fallbacks()))
    }
}

#[cfg(test)]
mod tests {
    use kdata_types::{DataItem, ItemIdKind};

    use super::*;
    use crate::context::Context;

    fn entity_with(bag: &DataBag, ctx: &Context) -> DataSlice {
        let id = ctx.allocate(ItemIdKind::Object);
        DataSlice::from_item(id).with_bag(bag.clone())
    }

    #[test]
    fn test_enriched_own_bag_wins() {
        let ctx = Context::with_seed(11);
        let own = DataBag::new();
        let x = entity_with(&own, &ctx);
        let id = x.items()[0].as_item_id().unwrap();
        own.set_attr(id, "a", 1.into()).unwrap();

        let other = DataBag::new();
        other.set_attr(id, "a", 2.into()).unwrap();
        other.set_attr(id, "b", 3.into()).unwrap();

        let enriched = x.enriched(&[other.clone()]).unwrap();
        let bag = enriched.bag().unwrap();
        assert_eq!(bag.get_attr(id, "a"), DataItem::from(1));
        assert_eq!(bag.get_attr(id, "b"), DataItem::from(3));
        assert!(!bag.is_mutable());

        let updated = x.updated(&[other]).unwrap();
        assert_eq!(updated.bag().unwrap().get_attr(id, "a"), DataItem::from(2));
    }

    #[test]
    fn test_compose_without_own_bag() {
        let ctx = Context::with_seed(12);
        let x = DataSlice::from_item(ctx.allocate(ItemIdKind::Object));
        assert!(x.enriched(&[]).unwrap().bag().is_none());

        let bag = DataBag::new();
        let attached = x.updated(&[bag.clone()]).unwrap();
        assert!(!attached.bag().unwrap().is_mutable());
        assert!(bag.is_mutable());
    }

    #[test]
    fn test_with_merged_bag() {
        let ctx = Context::with_seed(13);
        let base = DataBag::new();
        let x = entity_with(&base, &ctx);
        let id = x.items()[0].as_item_id().unwrap();
        base.set_attr(id, "a", 1.into()).unwrap();
        let top = DataBag::new();
        top.set_attr(id, "b", 2.into()).unwrap();

        let merged = x.enriched(&[top]).unwrap().with_merged_bag().unwrap();
        let bag = merged.bag().unwrap();
        assert!(bag.is_mutable());
        assert!(bag.fallbacks().is_empty());
        assert_eq!(bag.get_attr(id, "b"), DataItem::from(2));
        assert!(x.no_bag().with_merged_bag().is_err());
    }
}
