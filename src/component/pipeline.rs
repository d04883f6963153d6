//! Ordered component pipeline
//!
//! Components live in an arena of slots and are addressed by a stable
//! [`ComponentId`]. The order is kept as `prev`/`next` links on each node, so
//! inserting or removing a stage only rewires its neighbours. A removed slot
//! bumps its generation, which turns any id still held for it (for example by
//! a socket task that has not noticed it was ended) into a dangling id that
//! resolves to nothing.
//!
//! Dispatch is synchronous and breadth-first over a FIFO queue: a message
//! pushed by stage `i` on the ingress side goes to `next(i)`, on the egress
//! side to `prev(i)`. Because a dispatch runs to completion before the caller
//! regains control, the sequence is never mutated with messages in flight.

use std::collections::VecDeque;
use std::fmt;

use tokio::sync::mpsc;

use super::{Completion, Component, Context, Control, Link};
use crate::message::Message;

/// Stable handle to a component in a [`Pipeline`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ComponentId {
    index: u32,
    generation: u32,
}

impl fmt::Display for ComponentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}.{}", self.index, self.generation)
    }
}

/// Ingress pushed through a [`Link`]
#[derive(Debug)]
pub(crate) struct Injected {
    pub(crate) from: ComponentId,
    pub(crate) msg: Message,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Ingress,
    Egress,
}

struct Hop {
    flow: Flow,
    target: ComponentId,
    msg: Message,
}

struct Node {
    component: Box<dyn Component>,
    prev: Option<ComponentId>,
    next: Option<ComponentId>,
}

struct Slot {
    generation: u32,
    node: Option<Node>,
}

/// An ordered, mutable chain of components
pub struct Pipeline {
    slots: Vec<Slot>,
    free: Vec<u32>,
    head: Option<ComponentId>,
    tail: Option<ComponentId>,
    len: usize,
    inject_tx: mpsc::UnboundedSender<Injected>,
    inject_rx: mpsc::UnboundedReceiver<Injected>,
}

impl Pipeline {
    /// Create an empty pipeline
    pub fn new() -> Self {
        let (inject_tx, inject_rx) = mpsc::unbounded_channel();
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            head: None,
            tail: None,
            len: 0,
            inject_tx,
            inject_rx,
        }
    }

    /// Build a pipeline from components in head-to-tail order
    pub fn from_components(components: Vec<Box<dyn Component>>) -> Self {
        let mut pipeline = Self::new();
        for component in components {
            pipeline.append(component);
        }
        pipeline
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn head(&self) -> Option<ComponentId> {
        self.head
    }

    pub fn tail(&self) -> Option<ComponentId> {
        self.tail
    }

    /// Whether `id` refers to a component currently in the pipeline
    pub fn contains(&self, id: ComponentId) -> bool {
        self.node(id).is_some()
    }

    /// Component ids in head-to-tail order
    pub fn ids(&self) -> Vec<ComponentId> {
        let mut ids = Vec::with_capacity(self.len);
        let mut cursor = self.head;
        while let Some(id) = cursor {
            ids.push(id);
            cursor = self.node(id).and_then(|n| n.next);
        }
        ids
    }

    /// Component names in head-to-tail order
    pub fn names(&self) -> Vec<&'static str> {
        self.ids()
            .into_iter()
            .filter_map(|id| self.node(id).map(|n| n.component.name()))
            .collect()
    }

    pub fn get_mut(&mut self, id: ComponentId) -> Option<&mut (dyn Component + 'static)> {
        self.node_mut(id).map(|n| n.component.as_mut())
    }

    /// Add a component at the application end
    pub fn append(&mut self, component: Box<dyn Component>) -> ComponentId {
        let id = self.alloc(component, self.tail, None);
        match self.tail {
            Some(tail) => self.set_next(tail, Some(id)),
            None => self.head = Some(id),
        }
        self.tail = Some(id);
        id
    }

    /// Add a component at the network end
    pub fn prepend(&mut self, component: Box<dyn Component>) -> ComponentId {
        let id = self.alloc(component, None, self.head);
        match self.head {
            Some(head) => self.set_prev(head, Some(id)),
            None => self.tail = Some(id),
        }
        self.head = Some(id);
        id
    }

    /// Insert a component directly before `anchor`
    ///
    /// Returns `None` (and drops the component) if `anchor` is not in the
    /// pipeline.
    pub fn insert_before(
        &mut self,
        anchor: ComponentId,
        component: Box<dyn Component>,
    ) -> Option<ComponentId> {
        let prev = self.node(anchor)?.prev;
        let id = self.alloc(component, prev, Some(anchor));
        match prev {
            Some(prev) => self.set_next(prev, Some(id)),
            None => self.head = Some(id),
        }
        self.set_prev(anchor, Some(id));
        Some(id)
    }

    /// Unlink a component and hand it back
    ///
    /// The component should be ended first; anything it pushes through its
    /// [`Link`] afterwards is dropped.
    pub fn remove(&mut self, id: ComponentId) -> Option<Box<dyn Component>> {
        let slot = self.slots.get_mut(id.index as usize)?;
        if slot.generation != id.generation {
            return None;
        }
        let node = slot.node.take()?;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(id.index);
        self.len -= 1;

        match node.prev {
            Some(prev) => self.set_next(prev, node.next),
            None => self.head = node.next,
        }
        match node.next {
            Some(next) => self.set_prev(next, node.prev),
            None => self.tail = node.prev,
        }

        tracing::debug!(component = node.component.name(), id = %id, "Component removed");
        Some(node.component)
    }

    /// Write a message into the egress flow at the application end
    pub fn write(&mut self, msg: Message) {
        match self.tail {
            Some(tail) => self.dispatch(VecDeque::from([Hop {
                flow: Flow::Egress,
                target: tail,
                msg,
            }])),
            None => tracing::trace!("Write on empty pipeline dropped"),
        }
    }

    /// Push a message into the ingress flow right after `from`
    pub fn inject(&mut self, from: ComponentId, msg: Message) {
        if !self.contains(from) {
            tracing::trace!(id = %from, "Ingress from removed component dropped");
            return;
        }
        let mut queue = VecDeque::new();
        self.route(from, Flow::Ingress, msg, &mut queue);
        self.dispatch(queue);
    }

    /// Send a control to a component and dispatch whatever it emits
    ///
    /// Returns false if `id` is not in the pipeline.
    pub fn control(&mut self, id: ComponentId, control: Control) -> bool {
        let Some(node) = self.node_mut(id) else {
            return false;
        };
        let mut ctx = Context::new();
        node.component.on_control(control, &mut ctx);

        let mut queue = VecDeque::new();
        self.route_outputs(id, ctx, &mut queue);
        self.dispatch(queue);
        true
    }

    /// Wait for the next message pushed through a [`Link`]
    pub(crate) async fn recv_injected(&mut self) -> Option<Injected> {
        self.inject_rx.recv().await
    }

    pub(crate) fn dispatch_injected(&mut self, injected: Injected) {
        self.inject(injected.from, injected.msg);
    }

    /// Dispatch every message already pushed through links
    ///
    /// Returns the number of messages taken off the link queue.
    pub fn dispatch_pending(&mut self) -> usize {
        let mut count = 0;
        while let Ok(injected) = self.inject_rx.try_recv() {
            self.dispatch_injected(injected);
            count += 1;
        }
        count
    }

    /// Wait for one link message and dispatch it
    pub async fn dispatch_next(&mut self) {
        if let Some(injected) = self.recv_injected().await {
            self.dispatch_injected(injected);
        }
    }

    /// End a single component
    pub fn end_component(&mut self, id: ComponentId) -> Option<Completion> {
        self.node_mut(id).map(|n| n.component.end())
    }

    /// End every component and wait until all of them have finished
    pub async fn end(&mut self) {
        let completions: Vec<Completion> = self
            .ids()
            .into_iter()
            .filter_map(|id| self.end_component(id))
            .collect();

        tracing::debug!(components = completions.len(), "Ending pipeline");

        for completion in completions {
            completion.wait().await;
        }
    }

    fn alloc(
        &mut self,
        mut component: Box<dyn Component>,
        prev: Option<ComponentId>,
        next: Option<ComponentId>,
    ) -> ComponentId {
        let index = match self.free.pop() {
            Some(index) => index,
            None => {
                self.slots.push(Slot {
                    generation: 0,
                    node: None,
                });
                (self.slots.len() - 1) as u32
            }
        };
        let id = ComponentId {
            index,
            generation: self.slots[index as usize].generation,
        };

        component.on_attach(Link::new(id, self.inject_tx.clone()));
        tracing::debug!(component = component.name(), id = %id, "Component added");

        self.slots[index as usize].node = Some(Node {
            component,
            prev,
            next,
        });
        self.len += 1;
        id
    }

    fn node(&self, id: ComponentId) -> Option<&Node> {
        let slot = self.slots.get(id.index as usize)?;
        if slot.generation != id.generation {
            return None;
        }
        slot.node.as_ref()
    }

    fn node_mut(&mut self, id: ComponentId) -> Option<&mut Node> {
        let slot = self.slots.get_mut(id.index as usize)?;
        if slot.generation != id.generation {
            return None;
        }
        slot.node.as_mut()
    }

    fn set_next(&mut self, id: ComponentId, next: Option<ComponentId>) {
        if let Some(node) = self.node_mut(id) {
            node.next = next;
        }
    }

    fn set_prev(&mut self, id: ComponentId, prev: Option<ComponentId>) {
        if let Some(node) = self.node_mut(id) {
            node.prev = prev;
        }
    }

    fn route(&self, from: ComponentId, flow: Flow, msg: Message, queue: &mut VecDeque<Hop>) {
        let node = self.node(from);
        let target = match flow {
            Flow::Ingress => node.and_then(|n| n.next),
            Flow::Egress => node.and_then(|n| n.prev),
        };
        match target {
            Some(target) => queue.push_back(Hop { flow, target, msg }),
            None => tracing::trace!(
                from = %from,
                flow = ?flow,
                bytes = msg.len(),
                "Message left the pipeline"
            ),
        }
    }

    fn route_outputs(&self, from: ComponentId, ctx: Context, queue: &mut VecDeque<Hop>) {
        let (ingress, egress) = ctx.take();
        for msg in ingress {
            self.route(from, Flow::Ingress, msg, queue);
        }
        for msg in egress {
            self.route(from, Flow::Egress, msg, queue);
        }
    }

    fn dispatch(&mut self, mut queue: VecDeque<Hop>) {
        while let Some(hop) = queue.pop_front() {
            let Some(node) = self.node_mut(hop.target) else {
                continue;
            };
            let mut ctx = Context::new();
            match hop.flow {
                Flow::Ingress => node.component.on_ingress(hop.msg, &mut ctx),
                Flow::Egress => node.component.on_egress(hop.msg, &mut ctx),
            }
            self.route_outputs(hop.target, ctx, &mut queue);
        }
    }
}

impl Default for Pipeline {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use bytes::Bytes;
    use parking_lot::Mutex;

    use super::*;
    use crate::component::Passthrough;

    type Log = Arc<Mutex<Vec<(&'static str, Bytes)>>>;

    /// Appends its tag to every message and records what it saw
    struct Tagger {
        tag: &'static str,
        log: Log,
    }

    impl Tagger {
        fn boxed(tag: &'static str, log: &Log) -> Box<dyn Component> {
            Box::new(Self {
                tag,
                log: Arc::clone(log),
            })
        }

        fn tagged(&self, msg: &Message) -> Message {
            let mut data = msg.payload().to_vec();
            data.extend_from_slice(self.tag.as_bytes());
            Message::raw(data)
        }
    }

    impl Component for Tagger {
        fn name(&self) -> &'static str {
            self.tag
        }

        fn on_ingress(&mut self, msg: Message, ctx: &mut Context) {
            self.log.lock().push((self.tag, msg.payload().clone()));
            ctx.push_ingress(self.tagged(&msg));
        }

        fn on_egress(&mut self, msg: Message, ctx: &mut Context) {
            self.log.lock().push((self.tag, msg.payload().clone()));
            ctx.push_egress(self.tagged(&msg));
        }
    }

    /// Counts how often it was ended
    struct Endable {
        ended: Arc<AtomicUsize>,
    }

    impl Component for Endable {
        fn name(&self) -> &'static str {
            "endable"
        }

        fn end(&mut self) -> Completion {
            self.ended.fetch_add(1, Ordering::SeqCst);
            let (completer, completion) = Completion::pending();
            tokio::spawn(async move {
                tokio::task::yield_now().await;
                completer.complete();
            });
            completion
        }
    }

    /// Answers every ingress message with an egress echo
    struct Echo;

    impl Component for Echo {
        fn name(&self) -> &'static str {
            "echo"
        }

        fn on_ingress(&mut self, msg: Message, ctx: &mut Context) {
            ctx.push_egress(msg.clone());
            ctx.push_ingress(msg);
        }
    }

    fn seen(log: &Log) -> Vec<(&'static str, Bytes)> {
        log.lock().clone()
    }

    #[test]
    fn test_append_prepend_order() {
        let log = Log::default();
        let mut pipeline = Pipeline::new();
        pipeline.append(Tagger::boxed("b", &log));
        pipeline.append(Tagger::boxed("c", &log));
        pipeline.prepend(Tagger::boxed("a", &log));

        assert_eq!(pipeline.names(), vec!["a", "b", "c"]);
        assert_eq!(pipeline.len(), 3);
    }

    #[test]
    fn test_ingress_flows_forward() {
        let log = Log::default();
        let mut pipeline = Pipeline::new();
        let a = pipeline.append(Tagger::boxed("a", &log));
        pipeline.append(Tagger::boxed("b", &log));
        pipeline.append(Tagger::boxed("c", &log));

        pipeline.inject(a, Message::raw(&b"x"[..]));

        assert_eq!(
            seen(&log),
            vec![
                ("b", Bytes::from_static(b"x")),
                ("c", Bytes::from_static(b"xb")),
            ]
        );
    }

    #[test]
    fn test_egress_flows_backward() {
        let log = Log::default();
        let mut pipeline = Pipeline::new();
        pipeline.append(Tagger::boxed("a", &log));
        pipeline.append(Tagger::boxed("b", &log));
        pipeline.append(Tagger::boxed("c", &log));

        pipeline.write(Message::raw(&b"cmd"[..]));

        assert_eq!(
            seen(&log),
            vec![
                ("c", Bytes::from_static(b"cmd")),
                ("b", Bytes::from_static(b"cmdc")),
                ("a", Bytes::from_static(b"cmdcb")),
            ]
        );
    }

    #[test]
    fn test_insert_before_rewires() {
        let log = Log::default();
        let mut pipeline = Pipeline::new();
        let a = pipeline.append(Tagger::boxed("a", &log));
        let c = pipeline.append(Tagger::boxed("c", &log));
        pipeline.insert_before(c, Tagger::boxed("b", &log)).unwrap();
        pipeline.insert_before(a, Tagger::boxed("z", &log)).unwrap();

        assert_eq!(pipeline.names(), vec!["z", "a", "b", "c"]);

        pipeline.inject(a, Message::raw(&b"1"[..]));
        pipeline.write(Message::raw(&b"2"[..]));

        assert_eq!(
            seen(&log),
            vec![
                ("b", Bytes::from_static(b"1")),
                ("c", Bytes::from_static(b"1b")),
                ("c", Bytes::from_static(b"2")),
                ("b", Bytes::from_static(b"2c")),
                ("a", Bytes::from_static(b"2cb")),
                ("z", Bytes::from_static(b"2cba")),
            ]
        );
    }

    #[test]
    fn test_remove_rewires_and_invalidates_id() {
        let log = Log::default();
        let mut pipeline = Pipeline::new();
        let a = pipeline.append(Tagger::boxed("a", &log));
        let b = pipeline.append(Tagger::boxed("b", &log));
        pipeline.append(Tagger::boxed("c", &log));

        let removed = pipeline.remove(b).unwrap();
        assert_eq!(removed.name(), "b");
        assert!(!pipeline.contains(b));
        assert!(pipeline.remove(b).is_none());
        assert_eq!(pipeline.names(), vec!["a", "c"]);

        // The freed slot is reused under a new generation
        let d = pipeline.prepend(Tagger::boxed("d", &log));
        assert_ne!(d, b);
        assert_eq!(pipeline.names(), vec!["d", "a", "c"]);

        pipeline.inject(b, Message::raw(&b"stale"[..]));
        assert!(seen(&log).is_empty());

        pipeline.inject(a, Message::raw(&b"ok"[..]));
        assert_eq!(seen(&log), vec![("c", Bytes::from_static(b"ok"))]);
    }

    #[test]
    fn test_remove_head_and_tail() {
        let mut pipeline = Pipeline::new();
        let a = pipeline.append(Box::new(Passthrough::new("a")));
        let b = pipeline.append(Box::new(Passthrough::new("b")));

        pipeline.remove(a);
        assert_eq!(pipeline.head(), Some(b));
        assert_eq!(pipeline.tail(), Some(b));

        pipeline.remove(b);
        assert!(pipeline.is_empty());
        assert_eq!(pipeline.head(), None);
        assert_eq!(pipeline.tail(), None);
    }

    #[test]
    fn test_ordering_without_duplication() {
        let log = Log::default();
        let mut pipeline = Pipeline::new();
        let a = pipeline.append(Box::new(Passthrough::new("a")));
        pipeline.append(Tagger::boxed("sink", &log));

        for i in 0..10u8 {
            pipeline.inject(a, Message::raw(vec![i]));
        }

        let payloads: Vec<u8> = seen(&log).iter().map(|(_, b)| b[0]).collect();
        assert_eq!(payloads, (0..10).collect::<Vec<_>>());
    }

    #[test]
    fn test_handler_can_emit_both_ways() {
        let log = Log::default();
        let mut pipeline = Pipeline::new();
        pipeline.append(Tagger::boxed("net", &log));
        let echo = pipeline.append(Box::new(Echo));
        pipeline.append(Tagger::boxed("app", &log));
        let head = pipeline.head().unwrap();

        pipeline.inject(head, Message::raw(&b"ping"[..]));
        assert!(pipeline.contains(echo));

        let mut names: Vec<&str> = seen(&log).iter().map(|(n, _)| *n).collect();
        names.sort_unstable();
        assert_eq!(names, vec!["app", "net"]);
    }

    #[tokio::test]
    async fn test_link_messages_are_dispatched() {
        struct Source {
            link: Option<Link>,
        }

        impl Component for Source {
            fn name(&self) -> &'static str {
                "source"
            }

            fn on_attach(&mut self, link: Link) {
                self.link = Some(link);
            }

            fn on_egress(&mut self, msg: Message, _ctx: &mut Context) {
                if let Some(link) = &self.link {
                    link.push(msg);
                }
            }
        }

        let log = Log::default();
        let mut pipeline = Pipeline::new();
        pipeline.append(Box::new(Source { link: None }));
        pipeline.append(Tagger::boxed("sink", &log));

        // The source loops egress back as ingress through its link
        pipeline.write(Message::raw(&b"loop"[..]));
        assert_eq!(seen(&log).len(), 1);

        pipeline.dispatch_next().await;
        assert_eq!(seen(&log).len(), 2);
        assert_eq!(pipeline.dispatch_pending(), 0);
    }

    #[tokio::test]
    async fn test_end_waits_for_every_component() {
        let ended = Arc::new(AtomicUsize::new(0));
        let mut pipeline = Pipeline::new();
        pipeline.append(Box::new(Endable {
            ended: Arc::clone(&ended),
        }));
        pipeline.append(Box::new(Passthrough::new("idle")));
        pipeline.append(Box::new(Endable {
            ended: Arc::clone(&ended),
        }));

        pipeline.end().await;
        assert_eq!(ended.load(Ordering::SeqCst), 2);

        // Ending twice is harmless
        pipeline.end().await;
        assert_eq!(ended.load(Ordering::SeqCst), 4);
    }

    #[test]
    fn test_control_on_unknown_component() {
        let mut pipeline = Pipeline::new();
        let id = pipeline.append(Box::new(Passthrough::new("a")));
        pipeline.remove(id);
        assert!(!pipeline.control(id, Control::Play));
    }
}
