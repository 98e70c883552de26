//! Restaurant order queues.
//!
//! Every restaurant keeps the orders it has accepted and not yet handed to a
//! driver. The queue order decides which order a driver collects first.
//! `FCFS` appends; `SJF` inserts before the first queued order with a
//! strictly longer preparation time, so equal times keep arrival order.
//! Changing a restaurant's algorithm only affects later insertions.

use std::collections::BTreeMap;

use dispatch_types::{KitchenAlgorithm, OrderId, Restaurant, RestaurantId};

/// One queued order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueuedJob {
    /// The order.
    pub order: OrderId,
    /// Its total preparation time.
    pub prep_s: u32,
}

#[derive(Debug, Clone, Default)]
struct RestaurantQueue {
    algo: KitchenAlgorithm,
    jobs: Vec<QueuedJob>,
}

impl RestaurantQueue {
    fn insert(&mut self, job: QueuedJob) {
        match self.algo {
            KitchenAlgorithm::FirstComeFirstServed => self.jobs.push(job),
            KitchenAlgorithm::ShortestJobFirst => {
                let at = self
                    .jobs
                    .iter()
                    .position(|queued| queued.prep_s > job.prep_s)
                    .unwrap_or(self.jobs.len());
                self.jobs.insert(at, job);
            }
        }
    }
}

/// Queues of every restaurant, keyed by id.
#[derive(Debug, Clone, Default)]
pub struct Kitchens {
    queues: BTreeMap<RestaurantId, RestaurantQueue>,
}

impl Kitchens {
    /// Empty queues for `restaurants`, each starting with its own algorithm.
    pub fn new(restaurants: &[Restaurant]) -> Self {
        let queues = restaurants
            .iter()
            .map(|r| {
                (
                    r.id.clone(),
                    RestaurantQueue {
                        algo: r.algo,
                        jobs: Vec::new(),
                    },
                )
            })
            .collect();
        Self { queues }
    }

    /// Queue `order` at `restaurant`. Returns `false` for an unknown restaurant.
    pub fn enqueue(&mut self, restaurant: &RestaurantId, order: OrderId, prep_s: u32) -> bool {
        self.queues.get_mut(restaurant).is_some_and(|q| {
            q.insert(QueuedJob { order, prep_s });
            true
        })
    }

    /// Remove `order` from `restaurant`'s queue. Returns whether it was queued.
    pub fn release(&mut self, restaurant: &RestaurantId, order: OrderId) -> bool {
        let Some(queue) = self.queues.get_mut(restaurant) else {
            return false;
        };
        let before = queue.jobs.len();
        queue.jobs.retain(|job| job.order != order);
        queue.jobs.len() != before
    }

    /// Change the algorithm of one restaurant. Returns `false` if unknown.
    pub fn set_algorithm(&mut self, restaurant: &RestaurantId, algo: KitchenAlgorithm) -> bool {
        self.queues.get_mut(restaurant).is_some_and(|q| {
            q.algo = algo;
            true
        })
    }

    /// Change the algorithm of every restaurant.
    pub fn set_algorithm_all(&mut self, algo: KitchenAlgorithm) {
        for queue in self.queues.values_mut() {
            queue.algo = algo;
        }
    }

    /// Current algorithm of `restaurant`.
    pub fn algorithm(&self, restaurant: &RestaurantId) -> Option<KitchenAlgorithm> {
        self.queues.get(restaurant).map(|q| q.algo)
    }

    /// Queued orders of `restaurant`, head first.
    pub fn queued(&self, restaurant: &RestaurantId) -> impl Iterator<Item = OrderId> + '_ {
        self.queues
            .get(restaurant)
            .into_iter()
            .flat_map(|q| q.jobs.iter().map(|job| job.order))
    }

    /// Number of queued orders at `restaurant`.
    pub fn queue_len(&self, restaurant: &RestaurantId) -> u32 {
        self.queues
            .get(restaurant)
            .map_or(0, |q| u32::try_from(q.jobs.len()).unwrap_or(u32::MAX))
    }

    /// Position of `order` in `restaurant`'s queue, 0 for the head.
    pub fn rank(&self, restaurant: &RestaurantId, order: OrderId) -> Option<usize> {
        self.queued(restaurant).position(|queued| queued == order)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use dispatch_types::Position;

    use super::*;

    fn kitchens(algo: KitchenAlgorithm) -> (Kitchens, RestaurantId) {
        let id = RestaurantId::new("R1");
        let restaurants = vec![Restaurant {
            id: id.clone(),
            pos: Position::new(1, 1),
            algo,
            queue: 0,
        }];
        (Kitchens::new(&restaurants), id)
    }

    #[test]
    fn sjf_orders_by_prep_time_and_is_stable() {
        let (mut k, r) = kitchens(KitchenAlgorithm::ShortestJobFirst);
        assert!(k.enqueue(&r, OrderId(1), 30));
        assert!(k.enqueue(&r, OrderId(2), 20));
        assert!(k.enqueue(&r, OrderId(3), 30));
        assert!(k.enqueue(&r, OrderId(4), 25));
        let order: Vec<_> = k.queued(&r).collect();
        assert_eq!(order, vec![OrderId(2), OrderId(4), OrderId(1), OrderId(3)]);
    }

    #[test]
    fn fcfs_keeps_arrival_order() {
        let (mut k, r) = kitchens(KitchenAlgorithm::FirstComeFirstServed);
        k.enqueue(&r, OrderId(1), 40);
        k.enqueue(&r, OrderId(2), 10);
        let order: Vec<_> = k.queued(&r).collect();
        assert_eq!(order, vec![OrderId(1), OrderId(2)]);
    }

    #[test]
    fn switching_algorithm_does_not_reorder() {
        let (mut k, r) = kitchens(KitchenAlgorithm::FirstComeFirstServed);
        k.enqueue(&r, OrderId(1), 40);
        k.enqueue(&r, OrderId(2), 10);
        assert!(k.set_algorithm(&r, KitchenAlgorithm::ShortestJobFirst));
        assert_eq!(k.rank(&r, OrderId(2)), Some(1));

        k.enqueue(&r, OrderId(3), 5);
        assert_eq!(k.rank(&r, OrderId(3)), Some(0));
        assert_eq!(k.queue_len(&r), 3);
    }

    #[test]
    fn release_and_unknown_restaurants() {
        let (mut k, r) = kitchens(KitchenAlgorithm::ShortestJobFirst);
        k.enqueue(&r, OrderId(1), 20);
        assert!(k.release(&r, OrderId(1)));
        assert!(!k.release(&r, OrderId(1)));
        assert_eq!(k.queue_len(&r), 0);

        let ghost = RestaurantId::new("R9");
        assert!(!k.enqueue(&ghost, OrderId(2), 20));
        assert!(!k.set_algorithm(&ghost, KitchenAlgorithm::ShortestJobFirst));
        assert_eq!(k.algorithm(&ghost), None);
    }
}
