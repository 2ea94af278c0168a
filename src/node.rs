use crate::cache::ContentCache;
use crate::error::Error;
use crate::http::DescriptionServer;
use crate::message::{SendKind, SsdpMessage};
use crate::netif::{self, InterfaceInfo};
use crate::scanner::{guarded, ScanCallback, ScanState, Scanner, ScannerKey, IDLE};
use crate::scheduler::{self, PeriodicTask};
use crate::transport::{MulticastTransport, PacketHandler};
use rand::Rng;
use slotmap::SlotMap;
use std::future::Future;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::{Arc, Mutex, RwLock, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Frozen view of the node's settings
#[derive(Debug, Clone, Copy)]
pub(crate) struct Config {
    pub multicast_address: Ipv4Addr,
    pub port: u16,
    pub http_port: Option<u16>,
    pub ttl: u32,
    pub mx: u32,
    pub say_bye_bye_on_close: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            multicast_address: Ipv4Addr::new(239, 255, 255, 250),
            port: 1900,
            http_port: None,
            ttl: 300,
            mx: 5,
            say_bye_bye_on_close: true,
        }
    }
}

impl Config {
    pub(crate) fn host(&self) -> String {
        format!("{}:{}", self.multicast_address, self.port)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Lifecycle {
    Configured,
    Running,
    Closed,
}

/// A UPnP 1.0 discovery and description node
///
/// One `Node` owns one multicast receiver plus one sender socket per
/// network interface, an optional HTTP description server, and the sets
/// of published messages and active scanners. Configure with the fluent
/// setters, then [`start`](Node::start); a node goes through `Configured
/// → Running → Closed` exactly once.
///
/// `Node` is a cheap handle; clones share the same underlying node.
///
/// Publishing and scanning are not exclusive; a running node can do both
/// at the same time.
///
/// Internal locks are never held across suspension points; any method
/// here panics only if such a lock is poisoned, which would indicate a
/// bug in upnp-node.
#[derive(Clone)]
pub struct Node {
    pub(crate) inner: Arc<NodeInner>,
}

impl Default for Node {
    fn default() -> Self {
        Self::new()
    }
}

pub(crate) struct NodeInner {
    me: Weak<NodeInner>,
    config: Mutex<Config>,
    lifecycle: Mutex<Lifecycle>,
    published: RwLock<Vec<SsdpMessage>>,
    pub(crate) scanners: RwLock<SlotMap<ScannerKey, Arc<ScanState>>>,
    cache: ContentCache,
    transport: RwLock<Option<Arc<MulticastTransport>>>,
    http: Mutex<Option<DescriptionServer>>,
    announcer: Mutex<Option<PeriodicTask>>,
}

impl Node {
    /// A node on the default group, `239.255.255.250:1900`
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(Config::default())
    }

    /// A node on the given multicast group and the default port
    ///
    /// # Errors
    ///
    /// [`Error::InvalidAddress`] if `address` is not an IPv4 address.
    pub fn with_address(address: &str) -> Result<Self, Error> {
        Self::with_address_and_port(address, 1900)
    }

    /// A node on the given multicast group and port
    ///
    /// # Errors
    ///
    /// [`Error::InvalidAddress`] if `address` is not an IPv4 address.
    pub fn with_address_and_port(
        address: &str,
        port: u16,
    ) -> Result<Self, Error> {
        let multicast_address = address
            .parse()
            .map_err(|_| Error::InvalidAddress(address.to_string()))?;
        Ok(Self::with_config(Config {
            multicast_address,
            port,
            ..Config::default()
        }))
    }

    fn with_config(config: Config) -> Self {
        let inner = Arc::new_cyclic(|me| NodeInner {
            me: me.clone(),
            config: Mutex::new(config),
            lifecycle: Mutex::new(Lifecycle::Configured),
            published: RwLock::new(Vec::new()),
            scanners: RwLock::new(SlotMap::with_key()),
            cache: ContentCache::default(),
            transport: RwLock::new(None),
            http: Mutex::new(None),
            announcer: Mutex::new(None),
        });
        Self { inner }
    }

    /// The well-known root device notification type
    #[must_use]
    pub fn root_device() -> &'static str {
        "upnp:rootdevice"
    }

    /// The standard URN for a device type and version
    #[must_use]
    pub fn default_device_urn(name: &str, version: u32) -> String {
        format!("urn:schemas-upnp-org:device:{name}:{version}")
    }

    /// Configure whether byebyes go out for all published messages on close
    #[must_use]
    pub fn say_bye_bye_on_close(self, yes: bool) -> Self {
        self.inner.config.lock().unwrap().say_bye_bye_on_close = yes;
        self
    }

    /// Configure the MX value (seconds peers get to answer a search)
    #[must_use]
    pub fn set_mx(self, mx: u32) -> Self {
        self.inner.config.lock().unwrap().mx = mx;
        self
    }

    /// Configure the advertised message lifetime in seconds
    #[must_use]
    pub fn set_ttl(self, ttl: u32) -> Self {
        self.inner.config.lock().unwrap().ttl = ttl;
        self
    }

    /// Configure the port of the description server
    ///
    /// Without a port, no description server runs and every published
    /// location must resolve to an external URL.
    #[must_use]
    pub fn set_http_port(self, port: u16) -> Self {
        self.inner.config.lock().unwrap().http_port = Some(port);
        self
    }

    /// The configured description server port, if any
    #[must_use]
    pub fn http_port(&self) -> Option<u16> {
        self.inner.config().http_port
    }

    /// The configured MX value in seconds
    #[must_use]
    pub fn mx(&self) -> u32 {
        self.inner.config().mx
    }

    /// The configured message lifetime in seconds
    #[must_use]
    pub fn ttl(&self) -> u32 {
        self.inner.config().ttl
    }

    /// Start the node
    ///
    /// Brings up, in order: the description server (if an HTTP port is
    /// configured), the multicast transport on every eligible interface,
    /// and the periodic re-announcement of published messages (first
    /// after one second, then every `ttl / 3` seconds).
    ///
    /// # Errors
    ///
    /// [`Error::AlreadyStarted`] or [`Error::Closed`] on lifecycle
    /// misuse; otherwise whatever binding the sockets reports. A failed
    /// start tears down anything partially started and leaves the node
    /// configurable again.
    pub async fn start(&self) -> Result<(), Error> {
        {
            let mut lifecycle = self.inner.lifecycle.lock().unwrap();
            match *lifecycle {
                Lifecycle::Running => return Err(Error::AlreadyStarted),
                Lifecycle::Closed => return Err(Error::Closed),
                Lifecycle::Configured => *lifecycle = Lifecycle::Running,
            }
        }
        if let Err(e) = self.start_services().await {
            if let Some(http) = self.inner.http.lock().unwrap().take() {
                http.close();
            }
            if let Some(transport) =
                self.inner.transport.write().unwrap().take()
            {
                transport.shutdown();
            }
            *self.inner.lifecycle.lock().unwrap() = Lifecycle::Configured;
            return Err(e);
        }
        Ok(())
    }

    async fn start_services(&self) -> Result<(), Error> {
        let config = self.inner.config();
        if let Some(port) = config.http_port {
            let server =
                DescriptionServer::bind(port, self.inner.clone()).await?;
            *self.inner.http.lock().unwrap() = Some(server);
        }

        let interfaces = netif::local_interfaces()?;
        let handler: Arc<dyn PacketHandler> = self.inner.clone();
        let transport = MulticastTransport::open(
            config.multicast_address,
            config.port,
            &interfaces,
            handler,
        )?;
        *self.inner.transport.write().unwrap() = Some(Arc::new(transport));

        let inner = self.inner.clone();
        let announcer = PeriodicTask::spawn(
            Duration::from_millis(1000),
            Duration::from_millis(u64::from(config.ttl) * 333),
            move || {
                let inner = inner.clone();
                async move {
                    inner.notify_all().await;
                }
            },
        );
        *self.inner.announcer.lock().unwrap() = Some(announcer);
        Ok(())
    }

    /// Shut the node down
    ///
    /// Stops the description server and the periodic announcement, says
    /// byebye for everything published (when configured to), waits
    /// briefly so the datagrams leave the machine, then tears down the
    /// sockets. A second `close` is a no-op.
    pub async fn close(&self) {
        {
            let mut lifecycle = self.inner.lifecycle.lock().unwrap();
            if *lifecycle == Lifecycle::Closed {
                return;
            }
            *lifecycle = Lifecycle::Closed;
        }
        if let Some(http) = self.inner.http.lock().unwrap().take() {
            http.close();
        }
        if let Some(announcer) = self.inner.announcer.lock().unwrap().take() {
            announcer.cancel();
        }
        if self.inner.config().say_bye_bye_on_close {
            let published: Vec<SsdpMessage> =
                self.inner.published.read().unwrap().clone();
            for message in &published {
                self.inner.send_multicast(message, SendKind::ByeBye).await;
            }
            // give the OS a chance to flush the byebyes before the
            // sockets go away
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        if let Some(transport) = self.inner.transport.write().unwrap().take()
        {
            transport.shutdown();
        }
        self.inner.cache.reset();
    }

    /// Publish messages, multicasting one immediate alive for each
    ///
    /// A message that is not publishable (missing uuid, urn or location)
    /// is skipped. A published message equivalent to `message` (matching
    /// in both directions) is replaced in place, keeping its position in
    /// the announcement order; otherwise the message is appended. May be
    /// called before or after [`start`](Node::start).
    pub async fn publish<I>(&self, messages: I)
    where
        I: IntoIterator<Item = SsdpMessage>,
    {
        for message in messages {
            if !message.is_publishable() {
                debug!("not publishable, skipped: {message:?}");
                continue;
            }
            {
                let mut published = self.inner.published.write().unwrap();
                let replaced = published.iter().position(|m| {
                    m.matches(&message) && message.matches(m)
                });
                match replaced {
                    Some(i) => published[i] = message.clone(),
                    None => published.push(message.clone()),
                }
            }
            self.inner.send_multicast(&message, SendKind::Alive).await;
        }
    }

    /// Withdraw messages, multicasting one byebye for each removed entry
    ///
    /// Every published entry matching `message` as a filter is removed,
    /// so withdrawing by a matcher (urn only, say) withdraws the family.
    pub async fn withdraw<I>(&self, messages: I)
    where
        I: IntoIterator<Item = SsdpMessage>,
    {
        for message in messages {
            let removed: Vec<SsdpMessage> = {
                let mut published = self.inner.published.write().unwrap();
                let mut removed = Vec::new();
                published.retain(|m| {
                    if m.matches(&message) {
                        removed.push(m.clone());
                        false
                    } else {
                        true
                    }
                });
                removed
            };
            for message in &removed {
                self.inner.send_multicast(message, SendKind::ByeBye).await;
            }
        }
    }

    /// Register a scanner
    ///
    /// Incoming notifications and search replies matching `matcher` are
    /// routed to `callback` until the scanner is closed. Use
    /// [`Scanner::search`] to actively solicit replies.
    pub fn start_scan(
        &self,
        matcher: SsdpMessage,
        callback: impl ScanCallback + 'static,
    ) -> Scanner {
        let state = Arc::new(ScanState {
            matcher,
            callback: Box::new(callback),
            current_search_id: AtomicI32::new(IDLE),
        });
        let key = self.inner.scanners.write().unwrap().insert(state);
        Scanner::new(self.clone(), key)
    }

    /// Run a task on the node's executor after a delay
    ///
    /// Handy for deferring work out of a [`ScanCallback`], which runs on
    /// a receive task and must not block.
    pub fn schedule<F>(&self, delay: Duration, task: F) -> JoinHandle<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        scheduler::one_shot(delay, task)
    }

    /// Drop all cached description content
    ///
    /// The next HTTP request for each name fetches afresh from the
    /// published location descriptors.
    pub fn reset(&self) {
        self.inner.cache.reset();
    }

    /// The interfaces a running node is bound to, in enumeration order
    ///
    /// Empty before [`start`](Node::start), after [`close`](Node::close),
    /// and on hosts with no eligible interface.
    #[must_use]
    pub fn interfaces(&self) -> Vec<InterfaceInfo> {
        self.inner
            .transport
            .read()
            .unwrap()
            .as_ref()
            .map(|t| t.interfaces())
            .unwrap_or_default()
    }
}

impl NodeInner {
    pub(crate) fn config(&self) -> Config {
        *self.config.lock().unwrap()
    }

    pub(crate) async fn send(
        &self,
        to: SocketAddr,
        message: &SsdpMessage,
        kind: SendKind,
    ) {
        // the transport is replaced atomically at start and close; after
        // close there is simply nothing to send on
        let transport = self.transport.read().unwrap().clone();
        if let Some(transport) = transport {
            transport.send(&self.config(), to, message, kind).await;
        }
    }

    pub(crate) async fn send_multicast(
        &self,
        message: &SsdpMessage,
        kind: SendKind,
    ) {
        let config = self.config();
        let group = SocketAddr::V4(SocketAddrV4::new(
            config.multicast_address,
            config.port,
        ));
        self.send(group, message, kind).await;
    }

    async fn notify_all(&self) {
        let published: Vec<SsdpMessage> =
            self.published.read().unwrap().clone();
        for message in &published {
            self.send_multicast(message, SendKind::Alive).await;
        }
    }

    pub(crate) async fn description_for(&self, name: &str) -> Option<Vec<u8>> {
        self.cache.get(name, || self.resolve_content(name)).await
    }

    async fn resolve_content(&self, name: &str) -> Option<Vec<u8>> {
        let published: Vec<SsdpMessage> =
            self.published.read().unwrap().clone();
        for message in &published {
            let Some(location) = message.location() else {
                continue;
            };
            if location.name() == name {
                match location.content().await {
                    Ok(bytes) => return Some(bytes),
                    // keep scanning; another entry may carry the name
                    Err(e) => warn!("resolving description {name}: {e}"),
                }
            }
        }
        None
    }

    /// Respond to an M-SEARCH: schedule one randomly-delayed unicast
    /// reply per matching published message
    fn handle_search(&self, from: SocketAddr, text: &str) {
        if self.published.read().unwrap().is_empty() {
            return;
        }
        let Some(query) = SsdpMessage::parse(text) else {
            return;
        };
        let matching: Vec<SsdpMessage> = self
            .published
            .read()
            .unwrap()
            .iter()
            .filter(|m| m.matches(&query))
            .cloned()
            .collect();
        if matching.is_empty() {
            return;
        }
        let Some(me) = self.me.upgrade() else {
            return;
        };
        let wait = response_window_ms(query.ttl());
        for message in matching {
            let delay = rand::thread_rng().gen_range(0..wait) as u64;
            let me = me.clone();
            scheduler::one_shot(
                Duration::from_millis(delay),
                async move {
                    me.send(from, &message, SendKind::Reply).await;
                },
            );
        }
    }

    /// Route a NOTIFY or search response to the matching scanners
    fn dispatch(&self, from: SocketAddr, text: &str, reply: bool) {
        if self.scanners.read().unwrap().is_empty() {
            return;
        }
        let Some(message) = SsdpMessage::parse(text) else {
            return;
        };
        let Some(me) = self.me.upgrade() else {
            return;
        };
        // snapshot the matching scanners so callbacks can freely close
        // scanners or start new ones
        let targets: Vec<(ScannerKey, Arc<ScanState>)> = self
            .scanners
            .read()
            .unwrap()
            .iter()
            .filter(|(_, state)| message.matches(&state.matcher))
            .map(|(key, state)| (key, state.clone()))
            .collect();
        for (key, state) in targets {
            let scanner = Scanner::new(Node { inner: me.clone() }, key);
            let search_id = state.current_search_id.load(Ordering::SeqCst);
            if reply {
                guarded(|| {
                    state.callback.on_message_received(
                        &scanner,
                        from.ip(),
                        true,
                        search_id,
                        &message,
                    );
                });
            } else if message.location().is_none() {
                guarded(|| {
                    state
                        .callback
                        .on_message_byebye(&scanner, from.ip(), &message);
                });
            } else {
                guarded(|| {
                    state.callback.on_message_received(
                        &scanner,
                        from.ip(),
                        false,
                        search_id,
                        &message,
                    );
                });
            }
        }
    }
}

/// The window, in milliseconds, over which search replies are spread
///
/// Replies are delayed uniformly within `[0, window)` so that many
/// responders do not collide; the window tracks the query's MX seconds,
/// shortened a little to land inside it and bounded on both ends.
fn response_window_ms(mx_seconds: u32) -> i64 {
    (i64::from(mx_seconds) * 1000 - 500).clamp(100, 4500)
}

impl PacketHandler for NodeInner {
    fn handle_packet(&self, from: SocketAddr, data: &[u8]) {
        let text = String::from_utf8_lossy(data);
        if text.starts_with("M-SEARCH") {
            self.handle_search(from, &text);
        } else if text.starts_with("NOTIFY") {
            self.dispatch(from, &text, false);
        } else if text.starts_with("HTTP/1.1") {
            self.dispatch(from, &text, true);
        }
    }
}
