use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use base64::engine::general_purpose::STANDARD_NO_PAD;
use base64::Engine;
use bytes::Bytes;
use hickory_resolver::config::ResolverConfig;
use hickory_resolver::name_server::TokioConnectionProvider;
use hickory_resolver::TokioResolver;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, HOST, USER_AGENT};
use reqwest::Url;
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::CryptoProvider;
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{ClientConfig, DigitallySignedStruct, RootCertStore, SignatureScheme};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;
use tracing::{debug, error};

use crate::error::TransportError;
use crate::socks::Socks5Proxy;

/// Path every DoH request targets
pub const DOH_PATH: &str = "/dns-query";
/// Query-string parameter that carries the GET-encoded message
pub const DNS_PARAM: &str = "dns";
const HTTPS_PORT: u16 = 443;

/// HTTP method used to carry the DNS message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HttpMethod {
	Post,
	Get,
}

impl FromStr for HttpMethod {
	type Err = String;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s {
			"POST" => Ok(HttpMethod::Post),
			"GET" => Ok(HttpMethod::Get),
			other => Err(format!("unknown HTTP method '{}', expected POST or GET", other)),
		}
	}
}

impl fmt::Display for HttpMethod {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			HttpMethod::Post => f.write_str("POST"),
			HttpMethod::Get => f.write_str("GET"),
		}
	}
}

/// Where the TCP/TLS connection physically goes
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Authority {
	Host(String),
	Ip(IpAddr),
}

impl fmt::Display for Authority {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Authority::Host(host) => f.write_str(host),
			Authority::Ip(IpAddr::V4(ip)) => write!(f, "{}", ip),
			Authority::Ip(IpAddr::V6(ip)) => write!(f, "[{}]", ip),
		}
	}
}

/// How the DNS message travels
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
	/// Raw wire bytes as a POST body
	Body(Vec<u8>),
	/// Unpadded standard base64 in the `dns` query parameter of a GET
	DnsParam(String),
}

/// Fully shaped DoH request, derived per (profile, method, mode)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpRequestSpec {
	pub destination: Authority,
	/// TLS server name when it must differ from the destination
	pub sni: Option<String>,
	/// Header names and values in the order they are sent
	pub headers: Vec<(&'static str, String)>,
	/// Drop `user-agent` from the client's default headers before sending
	pub strip_user_agent: bool,
	pub payload: Payload,
}

impl HttpRequestSpec {
	pub fn method(&self) -> HttpMethod {
		match self.payload {
			Payload::Body(_) => HttpMethod::Post,
			Payload::DnsParam(_) => HttpMethod::Get,
		}
	}

	/// Value of header `name`, if the spec sends it
	pub fn header(&self, name: &str) -> Option<&str> {
		self.headers.iter()
			.find(|(n, _)| *n == name)
			.map(|(_, v)| v.as_str())
	}

	/// URL naming the physical destination, as a browser would log it
	pub fn destination_url(&self) -> Result<Url, TransportError> {
		self.url_for(&self.destination.to_string())
	}

	/// HTTP authority of the request: the `host` value when one is sent,
	/// otherwise the destination. Independent of the TLS server name.
	pub fn authority(&self) -> String {
		match self.header("host") {
			Some(host) => host.to_string(),
			None => self.destination.to_string(),
		}
	}

	/// Full request URL as the resolver sees it (`:scheme`, `:authority`, `:path`)
	pub fn request_url(&self) -> Result<Url, TransportError> {
		self.url_for(&self.authority())
	}

	/// Name advertised in the TLS ClientHello. IP destinations without an
	/// override advertise nothing.
	pub fn server_name(&self) -> Result<ServerName<'static>, TransportError> {
		let name = match (&self.sni, &self.destination) {
			(Some(sni), _) => sni.clone(),
			(None, Authority::Host(host)) => host.clone(),
			(None, Authority::Ip(ip)) => return Ok(ServerName::from(*ip)),
		};
		ServerName::try_from(name.clone()).map_err(|_| TransportError::ServerName(name))
	}

	fn url_for(&self, host: &str) -> Result<Url, TransportError> {
		let mut url = Url::parse(&format!("https://{}{}", host, DOH_PATH))
			.map_err(|e| TransportError::Url(format!("{}: {}", host, e)))?;
		if let Payload::DnsParam(encoded) = &self.payload {
			url.query_pairs_mut().append_pair(DNS_PARAM, encoded);
		}
		Ok(url)
	}
}

/// Standard base64 with trailing `=` removed
pub fn encode_dns_param(wire: &[u8]) -> String {
	STANDARD_NO_PAD.encode(wire)
}

/// Combine the client's default headers with the spec's headers.
///
/// Stripping the user agent mutates `defaults`, so it stays removed for every
/// later request made with the same client.
pub fn merge_headers(
	defaults: &mut HeaderMap,
	spec: &HttpRequestSpec,
) -> Result<HeaderMap, TransportError> {
	if spec.strip_user_agent {
		defaults.remove(USER_AGENT);
	}

	let mut headers = defaults.clone();
	for (name, value) in &spec.headers {
		let header_name = HeaderName::from_bytes(name.as_bytes())
			.map_err(|e| TransportError::Header { name: name.to_string(), reason: e.to_string() })?;
		let header_value = HeaderValue::from_str(value)
			.map_err(|e| TransportError::Header { name: name.to_string(), reason: e.to_string() })?;
		headers.insert(header_name, header_value);
	}
	Ok(headers)
}

/// Turn a shaped request into its HTTP/2 form.
///
/// HTTP/2 has no `host` field: its value moves into `:authority`, and the
/// destination fills that slot when no `host` is sent.
pub fn wire_request(
	spec: &HttpRequestSpec,
	defaults: &mut HeaderMap,
) -> Result<(http::Request<()>, Option<Bytes>), TransportError> {
	let mut headers = merge_headers(defaults, spec)?;
	headers.remove(HOST);

	let uri: http::Uri = spec.request_url()?.as_str().parse()
		.map_err(|e: http::uri::InvalidUri| TransportError::Url(e.to_string()))?;
	let (method, body) = match (spec.method(), &spec.payload) {
		(HttpMethod::Post, Payload::Body(wire)) => (http::Method::POST, Some(Bytes::from(wire.clone()))),
		_ => (http::Method::GET, None),
	};

	let mut request = http::Request::builder()
		.method(method)
		.uri(uri)
		.body(())?;
	*request.headers_mut() = headers;
	Ok((request, body))
}

/// Run one HTTP/2 exchange over an established stream and return the
/// response body, whatever the status.
pub async fn exchange<T>(
	io: T,
	request: http::Request<()>,
	body: Option<Bytes>,
) -> Result<Vec<u8>, TransportError>
where
	T: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
	let (client, connection) = h2::client::handshake(io).await?;
	tokio::spawn(async move {
		if let Err(e) = connection.await {
			debug!("h2 connection closed: {}", e);
		}
	});

	let mut client = client.ready().await?;
	let (response, mut stream) = client.send_request(request, body.is_none())?;
	if let Some(body) = body {
		stream.send_data(body, true)?;
	}

	let mut received = response.await?.into_body();
	let mut answer = Vec::new();
	while let Some(chunk) = received.data().await {
		let chunk = chunk?;
		received.flow_control().release_capacity(chunk.len())?;
		answer.extend_from_slice(&chunk);
	}
	Ok(answer)
}

/// Connection settings shared by every request of one client
#[derive(Debug, Clone)]
pub struct ClientSettings {
	/// SOCKS5 gateway URL, if traffic goes through a proxy
	pub proxy: Option<String>,
	pub timeout: Duration,
	pub verify_tls: bool,
	/// HTTP/2 only when true, HTTP/1.1 only otherwise
	pub http2_only: bool,
}

/// Build a rustls client configuration with webpki roots, or one that accepts
/// any certificate when verification is disabled.
pub fn tls_config(verify: bool, http2_only: bool) -> Result<ClientConfig, TransportError> {
	let provider = Arc::new(rustls::crypto::ring::default_provider());
	let builder = ClientConfig::builder_with_provider(provider.clone())
		.with_safe_default_protocol_versions()?;

	let mut config = if verify {
		let roots = RootCertStore::from_iter(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
		builder.with_root_certificates(roots).with_no_client_auth()
	} else {
		builder.dangerous()
			.with_custom_certificate_verifier(Arc::new(AcceptAnyCert(provider)))
			.with_no_client_auth()
	};

	config.alpn_protocols = if http2_only {
		vec![b"h2".to_vec()]
	} else {
		vec![b"http/1.1".to_vec()]
	};
	Ok(config)
}

/// Client for auxiliary calls (probes, provider API).
pub fn plain_client(settings: &ClientSettings) -> Result<reqwest::Client, TransportError> {
	let tls = tls_config(settings.verify_tls, settings.http2_only)?;
	let mut builder = reqwest::Client::builder()
		.use_preconfigured_tls(tls)
		.timeout(settings.timeout);

	builder = if settings.http2_only {
		builder.http2_prior_knowledge()
	} else {
		builder.http1_only()
	};

	if let Some(proxy) = &settings.proxy {
		builder = builder.proxy(reqwest::Proxy::all(proxy.as_str())?);
	}

	Ok(builder.build()?)
}

/// Client that executes shaped DoH requests over HTTP/2.
///
/// Holds reusable client state (default headers) the way a browser session
/// would, so header suppression persists across requests. Each query opens
/// its own tunnel, so the TLS name and the HTTP authority are chosen per
/// request.
pub struct DohClient {
	timeout: Duration,
	proxy: Option<Socks5Proxy>,
	tls: TlsConnector,
	base: reqwest::Client,
	resolver: TokioResolver,
	default_headers: HeaderMap,
}

impl DohClient {
	pub fn new(settings: ClientSettings) -> Result<Self, TransportError> {
		let proxy = settings.proxy.as_deref().map(Socks5Proxy::parse).transpose()?;
		let tls = tls_config(settings.verify_tls, true)?;
		let base = plain_client(&settings)?;
		let resolver = TokioResolver::builder_with_config(
			ResolverConfig::default(),
			TokioConnectionProvider::default(),
		).build();

		Ok(DohClient {
			timeout: settings.timeout,
			proxy,
			tls: TlsConnector::from(Arc::new(tls)),
			base,
			resolver,
			default_headers: HeaderMap::new(),
		})
	}

	pub fn default_headers(&self) -> &HeaderMap {
		&self.default_headers
	}

	/// Client for auxiliary calls through the same gateway
	pub fn http(&self) -> &reqwest::Client {
		&self.base
	}

	/// Send a shaped request and return the raw response body.
	///
	/// The body is returned whatever the status code; only transport-level
	/// failures are errors.
	pub async fn send(&mut self, spec: &HttpRequestSpec) -> Result<Vec<u8>, TransportError> {
		let (request, body) = wire_request(spec, &mut self.default_headers)?;
		let server_name = spec.server_name()?;

		let attempt = async {
			let tcp = self.connect(&spec.destination).await?;
			debug!("TLS to {} as {:?}, authority {}", spec.destination, server_name, spec.authority());
			let tls = self.tls.connect(server_name, tcp).await?;
			exchange(tls, request, body).await
		};
		tokio::time::timeout(self.timeout, attempt).await
			.map_err(|_| TransportError::Timeout(self.timeout))?
	}

	/// Best-effort variant of `send`: any failure is logged and yields an
	/// empty body so the caller records "no answer" and moves on.
	pub async fn query(&mut self, spec: &HttpRequestSpec) -> Vec<u8> {
		match self.send(spec).await {
			Ok(body) => body,
			Err(e) => {
				let url = spec.destination_url()
					.map(|u| u.to_string())
					.unwrap_or_else(|_| spec.destination.to_string());
				error!("during DoH querying {}: {}", url, e);
				Vec::new()
			}
		}
	}

	/// TCP stream to the destination. Through a gateway, hostnames are
	/// resolved by the gateway.
	async fn connect(&self, destination: &Authority) -> Result<TcpStream, TransportError> {
		match &self.proxy {
			Some(proxy) => proxy.connect(destination, HTTPS_PORT).await,
			None => {
				let addr = self.destination_addr(destination).await?;
				Ok(TcpStream::connect(addr).await?)
			}
		}
	}

	async fn destination_addr(&self, destination: &Authority) -> Result<SocketAddr, TransportError> {
		match destination {
			Authority::Ip(ip) => Ok(SocketAddr::new(*ip, HTTPS_PORT)),
			Authority::Host(host) => {
				let lookup = self.resolver.lookup_ip(host.as_str()).await
					.map_err(|e| TransportError::Resolve { host: host.clone(), reason: e.to_string() })?;
				let ip = lookup.iter().next().ok_or_else(|| TransportError::Resolve {
					host: host.clone(),
					reason: "no addresses".to_string(),
				})?;
				Ok(SocketAddr::new(ip, HTTPS_PORT))
			}
		}
	}
}

/// Certificate verifier for SNI-spoofed handshakes, where the presented
/// certificate never matches the advertised name. Signatures are still checked.
#[derive(Debug)]
struct AcceptAnyCert(Arc<CryptoProvider>);

impl ServerCertVerifier for AcceptAnyCert {
	fn verify_server_cert(
		&self,
		_end_entity: &CertificateDer<'_>,
		_intermediates: &[CertificateDer<'_>],
		_server_name: &ServerName<'_>,
		_ocsp_response: &[u8],
		_now: UnixTime,
	) -> Result<ServerCertVerified, rustls::Error> {
		Ok(ServerCertVerified::assertion())
	}

	fn verify_tls12_signature(
		&self,
		message: &[u8],
		cert: &CertificateDer<'_>,
		dss: &DigitallySignedStruct,
	) -> Result<HandshakeSignatureValid, rustls::Error> {
		rustls::crypto::verify_tls12_signature(message, cert, dss, &self.0.signature_verification_algorithms)
	}

	fn verify_tls13_signature(
		&self,
		message: &[u8],
		cert: &CertificateDer<'_>,
		dss: &DigitallySignedStruct,
	) -> Result<HandshakeSignatureValid, rustls::Error> {
		rustls::crypto::verify_tls13_signature(message, cert, dss, &self.0.signature_verification_algorithms)
	}

	fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
		self.0.signature_verification_algorithms.supported_schemes()
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use base64::engine::general_purpose::STANDARD;

	fn get_spec(sni: Option<&str>, destination: Authority) -> HttpRequestSpec {
		HttpRequestSpec {
			destination,
			sni: sni.map(String::from),
			headers: vec![("accept", "application/dns-message".to_string())],
			strip_user_agent: false,
			payload: Payload::DnsParam(encode_dns_param(&[0xfb, 0xff, 0x00, 0x01, 0x3e])),
		}
	}

	#[test]
	fn test_method_parsing() {
		assert_eq!("POST".parse::<HttpMethod>(), Ok(HttpMethod::Post));
		assert_eq!("GET".parse::<HttpMethod>(), Ok(HttpMethod::Get));
		assert!("get".parse::<HttpMethod>().is_err());
		assert_eq!(HttpMethod::Post.to_string(), "POST");
	}

	#[test]
	fn test_authority_display() {
		assert_eq!(Authority::Host("dns.google".into()).to_string(), "dns.google");
		assert_eq!(Authority::Ip("1.1.1.1".parse().unwrap()).to_string(), "1.1.1.1");
		assert_eq!(Authority::Ip("2606:4700::1111".parse().unwrap()).to_string(), "[2606:4700::1111]");
	}

	#[test]
	fn test_dns_param_strips_padding() {
		// 5 bytes encode to 8 chars with one '=' in standard base64
		let encoded = encode_dns_param(&[0xfb, 0xff, 0x00, 0x01, 0x3e]);
		assert_eq!(encoded, "+/8AAT4");
		assert!(!encoded.ends_with('='));
	}

	#[test]
	fn test_get_param_round_trip() {
		let wire: Vec<u8> = (0u8..=112).collect();
		let spec = HttpRequestSpec {
			payload: Payload::DnsParam(encode_dns_param(&wire)),
			..get_spec(None, Authority::Host("dns.google".into()))
		};
		let url = spec.request_url().unwrap();
		let (name, value) = url.query_pairs().next().unwrap();
		assert_eq!(name, DNS_PARAM);
		let mut padded = value.to_string();
		while padded.len() % 4 != 0 {
			padded.push('=');
		}
		assert_eq!(STANDARD.decode(padded).unwrap(), wire);
	}

	#[test]
	fn test_authority_follows_host_not_sni() {
		let mut spec = get_spec(Some("www.example.org"), Authority::Ip("8.8.4.4".parse().unwrap()));
		spec.headers.insert(0, ("host", "dns.google".to_string()));
		assert_eq!(spec.authority(), "dns.google");
		assert_eq!(spec.request_url().unwrap().host_str(), Some("dns.google"));
		assert_eq!(spec.destination_url().unwrap().host_str(), Some("8.8.4.4"));
		assert_eq!(spec.server_name().unwrap(), ServerName::try_from("www.example.org").unwrap());
		assert_eq!(spec.method(), HttpMethod::Get);

		// no host header: the destination is the authority
		let camouflage = get_spec(Some("www.example.org"), Authority::Host("cloudflare-dns.com".into()));
		assert_eq!(camouflage.authority(), "cloudflare-dns.com");
		assert_eq!(camouflage.server_name().unwrap(), ServerName::try_from("www.example.org").unwrap());
	}

	#[test]
	fn test_server_name_without_override() {
		let by_host = get_spec(None, Authority::Host("dns.google".into()));
		assert_eq!(by_host.server_name().unwrap(), ServerName::try_from("dns.google").unwrap());

		let by_ip = get_spec(None, Authority::Ip("1.1.1.1".parse().unwrap()));
		assert!(matches!(by_ip.server_name().unwrap(), ServerName::IpAddress(_)));

		let bad = get_spec(Some("not a name"), Authority::Host("dns.google".into()));
		assert!(matches!(bad.server_name(), Err(TransportError::ServerName(_))));
	}

	#[test]
	fn test_wire_request_moves_host_into_authority() {
		let spec = HttpRequestSpec {
			headers: vec![
				("host", "dns.google".to_string()),
				("accept", "application/dns-message".to_string()),
			],
			payload: Payload::Body(vec![1, 2, 3]),
			..get_spec(Some("www.example.org"), Authority::Ip("8.8.4.4".parse().unwrap()))
		};
		let (request, body) = wire_request(&spec, &mut HeaderMap::new()).unwrap();
		assert_eq!(request.method(), http::Method::POST);
		assert_eq!(request.uri().authority().map(|a| a.as_str()), Some("dns.google"));
		assert_eq!(request.uri().path(), DOH_PATH);
		assert!(request.headers().get(HOST).is_none());
		assert_eq!(request.headers().get("accept").unwrap(), "application/dns-message");
		assert_eq!(body, Some(Bytes::from_static(&[1, 2, 3])));
	}

	#[test]
	fn test_post_url_has_no_query() {
		let spec = HttpRequestSpec {
			payload: Payload::Body(vec![1, 2, 3]),
			..get_spec(None, Authority::Host("doh.example".into()))
		};
		assert_eq!(spec.request_url().unwrap().as_str(), "https://doh.example/dns-query");
		assert_eq!(spec.method(), HttpMethod::Post);
	}

	#[test]
	fn test_merge_strips_user_agent_persistently() {
		let mut defaults = HeaderMap::new();
		defaults.insert(USER_AGENT, HeaderValue::from_static("python-httpx/0.27"));
		defaults.insert("x-session", HeaderValue::from_static("1"));

		let spec = HttpRequestSpec {
			strip_user_agent: true,
			..get_spec(None, Authority::Host("doh.example".into()))
		};
		let merged = merge_headers(&mut defaults, &spec).unwrap();
		assert!(merged.get(USER_AGENT).is_none());
		assert_eq!(merged.get("accept").unwrap(), "application/dns-message");
		assert_eq!(merged.get("x-session").unwrap(), "1");
		assert!(defaults.get(USER_AGENT).is_none(), "removal must persist on the client");
	}

	#[test]
	fn test_merge_overrides_defaults() {
		let mut defaults = HeaderMap::new();
		defaults.insert(USER_AGENT, HeaderValue::from_static("python-httpx/0.27"));
		let spec = HttpRequestSpec {
			headers: vec![("user-agent", "Chrome".to_string()), ("accept-encoding", String::new())],
			..get_spec(None, Authority::Host("doh.example".into()))
		};
		let merged = merge_headers(&mut defaults, &spec).unwrap();
		assert_eq!(merged.get(USER_AGENT).unwrap(), "Chrome");
		assert_eq!(merged.get("accept-encoding").unwrap(), "");
		assert_eq!(defaults.get(USER_AGENT).unwrap(), "python-httpx/0.27");
	}

	#[test]
	fn test_tls_config_alpn() {
		let h2 = tls_config(true, true).unwrap();
		assert_eq!(h2.alpn_protocols, vec![b"h2".to_vec()]);
		let h1 = tls_config(false, false).unwrap();
		assert_eq!(h1.alpn_protocols, vec![b"http/1.1".to_vec()]);
	}

	const ANSWER: &[u8] = &[0, 0, 0x81, 0x80];

	type Received = (http::request::Parts, Vec<u8>);

	/// HTTP/2 server on one accepted stream that reports every request it sees
	fn serve_h2<T>(io: T) -> tokio::sync::mpsc::UnboundedReceiver<Received>
	where
		T: AsyncRead + AsyncWrite + Unpin + Send + 'static,
	{
		let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
		tokio::spawn(async move {
			let mut conn = h2::server::handshake(io).await.unwrap();
			while let Some(result) = conn.accept().await {
				let (request, mut respond) = result.unwrap();
				let tx = tx.clone();
				tokio::spawn(async move {
					let (parts, mut body) = request.into_parts();
					let mut received = Vec::new();
					while let Some(chunk) = body.data().await {
						let chunk = chunk.unwrap();
						let _ = body.flow_control().release_capacity(chunk.len());
						received.extend_from_slice(&chunk);
					}
					let response = http::Response::builder().status(200).body(()).unwrap();
					let mut send = respond.send_response(response, false).unwrap();
					send.send_data(Bytes::from_static(ANSWER), true).unwrap();
					tx.send((parts, received)).unwrap();
				});
			}
		});
		rx
	}

	#[tokio::test]
	async fn test_camouflaged_request_on_the_wire() {
		let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
		let addr = listener.local_addr().unwrap();
		let server = tokio::spawn(async move {
			let (socket, _) = listener.accept().await.unwrap();
			serve_h2(socket).recv().await.unwrap()
		});

		// spoofed SNI toward the public provider, no host header
		let spec = HttpRequestSpec {
			destination: Authority::Host("cloudflare-dns.com".into()),
			sni: Some("www.example.org".to_string()),
			headers: vec![("accept", "application/dns-message".to_string())],
			strip_user_agent: true,
			payload: Payload::Body(vec![0xab; 12]),
		};
		let (request, body) = wire_request(&spec, &mut HeaderMap::new()).unwrap();
		let tcp = TcpStream::connect(addr).await.unwrap();
		let answer = exchange(tcp, request, body).await.unwrap();
		assert_eq!(answer, ANSWER);

		let (parts, received) = server.await.unwrap();
		assert_eq!(parts.method, http::Method::POST);
		assert_eq!(parts.uri.authority().map(|a| a.as_str()), Some("cloudflare-dns.com"));
		assert!(parts.headers.get(HOST).is_none());
		assert_eq!(received, vec![0xab; 12]);
	}

	#[tokio::test]
	async fn test_pinned_request_through_gateway() {
		use tokio::io::{AsyncReadExt, AsyncWriteExt};

		let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
		let addr = listener.local_addr().unwrap();
		let gateway = tokio::spawn(async move {
			let (mut socket, _) = listener.accept().await.unwrap();
			let mut greeting = [0u8; 3];
			socket.read_exact(&mut greeting).await.unwrap();
			socket.write_all(&[0x05, 0x00]).await.unwrap();
			// CONNECT to an IPv4 literal
			let mut connect = [0u8; 10];
			socket.read_exact(&mut connect).await.unwrap();
			socket.write_all(&[0x05, 0x00, 0x00, 0x01, 0, 0, 0, 0, 0, 0]).await.unwrap();
			let received = serve_h2(socket).recv().await.unwrap();
			(connect, received)
		});

		let spec = HttpRequestSpec {
			destination: Authority::Ip("8.8.4.4".parse().unwrap()),
			sni: Some("www.example.org".to_string()),
			headers: vec![
				("host", "dns.google".to_string()),
				("accept", "application/dns-message".to_string()),
			],
			strip_user_agent: false,
			payload: Payload::DnsParam(encode_dns_param(&[0xfb, 0xff, 0x00, 0x01, 0x3e])),
		};
		let proxy = Socks5Proxy::parse(&format!("socks5://{}", addr)).unwrap();
		let tunnel = proxy.connect(&spec.destination, HTTPS_PORT).await.unwrap();
		let (request, body) = wire_request(&spec, &mut HeaderMap::new()).unwrap();
		assert_eq!(exchange(tunnel, request, body).await.unwrap(), ANSWER);

		let (connect, (parts, _)) = gateway.await.unwrap();
		assert_eq!(connect, [0x05, 0x01, 0x00, 0x01, 8, 8, 4, 4, 0x01, 0xbb]);
		assert_eq!(parts.method, http::Method::GET);
		assert_eq!(parts.uri.authority().map(|a| a.as_str()), Some("dns.google"));
		assert_eq!(parts.uri.path(), DOH_PATH);
		assert_eq!(parts.uri.query(), Some("dns=%2B%2F8AAT4"));
		assert!(parts.headers.get(HOST).is_none());
	}
}
